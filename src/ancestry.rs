//! Budgeted ancestor walk.
//!
//! Label, grouping-container and list-container lookups all climb the tree
//! from a control until some predicate matches. They share this one walker so
//! every climb is bounded by an explicit depth budget.

use tracing::debug;

use crate::element::ElementRef;
use crate::session::{NodeDescription, Session, SessionResult};

/// Default number of levels climbed before giving up
pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorWalk {
    pub max_depth: usize,
}

impl Default for AncestorWalk {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl AncestorWalk {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Nearest ancestor (within budget) whose description satisfies `stop`
    pub async fn find<P>(
        &self,
        session: &dyn Session,
        element: &ElementRef,
        mut stop: P,
    ) -> SessionResult<Option<ElementRef>>
    where
        P: FnMut(&NodeDescription) -> bool,
    {
        let mut handle = element.get_element(session).await?;
        for depth in 1..=self.max_depth {
            let Some(parent) = session.parent(&handle).await? else {
                return Ok(None);
            };
            let description = session.describe(&parent).await?;
            if stop(&description) {
                debug!(
                    "Ancestor {} of {} matched at depth {}",
                    description.selector_no_id, element, depth
                );
                return Ok(Some(ElementRef::from_description(
                    session,
                    parent,
                    description,
                )));
            }
            handle = parent;
        }
        debug!("No matching ancestor of {} within {} levels", element, self.max_depth);
        Ok(None)
    }
}

#[cfg(test)]
#[path = "ancestry_test.rs"]
mod ancestry_test;
