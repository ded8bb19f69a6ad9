//! Durable element identity.
//!
//! An [`ElementRef`] captures a node's structural CSS path together with a
//! snapshot of its markup and position. Live handles are resolved lazily per
//! session and re-resolved by selector whenever the browser invalidates them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::click::{ClickClassifier, ClickOutcome};
use crate::session::{ElementHandle, Locator, NodeDescription, Session, SessionError, SessionResult};
use crate::types::Position;

#[derive(Debug, Default)]
struct Binding {
    /// Id-qualified path; cleared for good once it stops resolving
    selector: Option<String>,
    /// Last live handle per session id
    handles: HashMap<String, ElementHandle>,
}

/// Reference to one DOM node that outlives its browser handles
pub struct ElementRef {
    selector_no_id: String,
    tag_name: String,
    outer_html: String,
    position: Position,
    displayed: bool,
    zero_area: bool,
    attributes: BTreeMap<String, String>,
    checked: Option<bool>,
    binding: Mutex<Binding>,
}

impl ElementRef {
    /// Wrap a live handle, capturing its snapshot immediately
    pub async fn from_handle(session: &dyn Session, handle: ElementHandle) -> SessionResult<Self> {
        let description = session.describe(&handle).await?;
        Ok(Self::from_description(session, handle, description))
    }

    /// Build from an already captured description of `handle`
    pub fn from_description(
        session: &dyn Session,
        handle: ElementHandle,
        description: NodeDescription,
    ) -> Self {
        let mut handles = HashMap::new();
        handles.insert(session.id().to_string(), handle);
        ElementRef {
            selector_no_id: description.selector_no_id,
            tag_name: description.tag_name,
            outer_html: description.outer_html,
            position: description.rect.position(),
            displayed: description.displayed,
            zero_area: description.rect.is_zero_area(),
            attributes: description.attributes,
            checked: description.checked,
            binding: Mutex::new(Binding {
                selector: description.selector,
                handles,
            }),
        }
    }

    /// Resolve a structural selector eagerly; fails with `ElementLost` when nothing matches
    pub async fn from_selector(session: &dyn Session, selector_no_id: &str) -> SessionResult<Self> {
        let handle = session
            .find(&Locator::css(selector_no_id))
            .await?
            .ok_or_else(|| lost(selector_no_id, "no node matches"))?;
        let description = session.describe(&handle).await.map_err(|e| {
            if e.is_lost() {
                lost(selector_no_id, "node vanished while describing it")
            } else {
                e
            }
        })?;
        let mut element = Self::from_description(session, handle, description);
        // a bare structural selector never carries the id path
        element.lock().selector = None;
        element.selector_no_id = selector_no_id.to_string();
        Ok(element)
    }

    /// Wrap every handle, skipping nodes that disappear meanwhile
    pub async fn from_handles(
        session: &dyn Session,
        handles: Vec<ElementHandle>,
    ) -> SessionResult<Vec<Self>> {
        let descriptions = session.describe_many(&handles).await?;
        let mut elements = Vec::with_capacity(handles.len());
        for (handle, description) in handles.into_iter().zip(descriptions) {
            match description {
                Ok(description) => {
                    elements.push(Self::from_description(session, handle, description))
                }
                Err(e) if e.is_lost() => debug!("Skipping vanished node: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(elements)
    }

    fn lock(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn selector_no_id(&self) -> &str {
        &self.selector_no_id
    }

    /// Id-qualified selector if it is still considered usable
    pub fn selector(&self) -> Option<String> {
        self.lock().selector.clone()
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn outer_html(&self) -> &str {
        &self.outer_html
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Attribute as captured at construction time
    pub fn cached_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Checked or selected state when captured; `None` for nodes without one
    pub fn checked(&self) -> Option<bool> {
        self.checked
    }

    /// Whether the node was visible with non-zero area when captured
    pub fn was_visible(&self) -> bool {
        self.displayed && !self.zero_area
    }

    /// Live handle valid for `session`
    pub async fn get_element(&self, session: &dyn Session) -> SessionResult<ElementHandle> {
        let memo = self.lock().handles.get(session.id()).cloned();
        if let Some(handle) = memo {
            match session.tag_name(&handle).await {
                Ok(_) => return Ok(handle),
                Err(e) if e.is_lost() => {
                    debug!("Handle for {} went stale, re-resolving", self.selector_no_id)
                }
                Err(e) => return Err(e),
            }
        }

        let handle = self.locate(session).await?;
        self.lock()
            .handles
            .insert(session.id().to_string(), handle.clone());
        Ok(handle)
    }

    async fn locate(&self, session: &dyn Session) -> SessionResult<ElementHandle> {
        let selector = self.lock().selector.clone();
        if let Some(selector) = selector {
            match session.find(&Locator::css(selector.as_str())).await {
                Ok(Some(handle)) => return Ok(handle),
                Ok(None) => {}
                Err(e) if e.is_lost() => {}
                Err(e) => return Err(e),
            }
            debug!(
                "Id selector {} no longer resolves, falling back to {}",
                selector, self.selector_no_id
            );
            self.lock().selector = None;
        }

        match session.find(&Locator::css(self.selector_no_id.as_str())).await? {
            Some(handle) => Ok(handle),
            None => {
                let url = session.current_url().await.unwrap_or_default();
                Err(lost(&self.selector_no_id, &format!("could not locate on {url}")))
            }
        }
    }

    /// Click through `classifier` and report the side effect
    pub async fn click(
        &self,
        session: &dyn Session,
        classifier: &ClickClassifier,
    ) -> SessionResult<ClickOutcome> {
        classifier.click(self, session).await
    }

    /// Current attribute value read from the live node
    pub async fn attribute(&self, session: &dyn Session, name: &str) -> SessionResult<Option<String>> {
        let handle = self.get_element(session).await?;
        session.attribute(&handle, name).await.map_err(|e| self.lost_on(e))
    }

    pub async fn text(&self, session: &dyn Session) -> SessionResult<String> {
        let handle = self.get_element(session).await?;
        session.text(&handle).await.map_err(|e| self.lost_on(e))
    }

    pub async fn is_displayed(&self, session: &dyn Session) -> SessionResult<bool> {
        let handle = self.get_element(session).await?;
        session.is_displayed(&handle).await.map_err(|e| self.lost_on(e))
    }

    /// Displayed with a non-zero area right now
    pub async fn is_visible(&self, session: &dyn Session) -> SessionResult<bool> {
        let handle = self.get_element(session).await?;
        let rect = session.rect(&handle).await.map_err(|e| self.lost_on(e))?;
        if rect.is_zero_area() {
            return Ok(false);
        }
        session.is_displayed(&handle).await.map_err(|e| self.lost_on(e))
    }

    pub async fn parent(&self, session: &dyn Session) -> SessionResult<Option<ElementRef>> {
        let handle = self.get_element(session).await?;
        match session.parent(&handle).await.map_err(|e| self.lost_on(e))? {
            Some(parent) => Ok(Some(ElementRef::from_handle(session, parent).await?)),
            None => Ok(None),
        }
    }

    /// Descendants matching `locator`
    pub async fn find_all_within(
        &self,
        session: &dyn Session,
        locator: &Locator,
    ) -> SessionResult<Vec<ElementRef>> {
        let handle = self.get_element(session).await?;
        let handles = session
            .find_all_within(&handle, locator)
            .await
            .map_err(|e| self.lost_on(e))?;
        Self::from_handles(session, handles).await
    }

    /// True when `other` lies strictly below this node
    pub fn is_ancestor_of(&self, other: &ElementRef) -> bool {
        other
            .selector_no_id
            .strip_prefix(self.selector_no_id.as_str())
            .is_some_and(|rest| rest.starts_with(" > "))
    }

    /// Same node, an ancestor or a descendant
    pub fn is_related_to(&self, other: &ElementRef) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Run `op` on every element, dropping the ones found lost
    pub async fn safe_retain<F, Fut>(elements: &mut Vec<ElementRef>, mut op: F) -> SessionResult<()>
    where
        F: FnMut(&ElementRef) -> Fut,
        Fut: std::future::Future<Output = SessionResult<bool>>,
    {
        let mut kept = Vec::with_capacity(elements.len());
        for element in elements.drain(..) {
            match op(&element).await {
                Ok(true) => kept.push(element),
                Ok(false) => {}
                Err(e) if e.is_lost() => debug!("Dropping lost element {}", element),
                Err(e) => return Err(e),
            }
        }
        *elements = kept;
        Ok(())
    }

    fn lost_on(&self, error: SessionError) -> SessionError {
        if error.is_lost() {
            lost(&self.selector_no_id, &error.to_string())
        } else {
            error
        }
    }
}

fn lost(selector: &str, reason: &str) -> SessionError {
    SessionError::ElementLost(format!("{selector}: {reason}"))
}

impl Clone for ElementRef {
    fn clone(&self) -> Self {
        let binding = self.lock();
        ElementRef {
            selector_no_id: self.selector_no_id.clone(),
            tag_name: self.tag_name.clone(),
            outer_html: self.outer_html.clone(),
            position: self.position,
            displayed: self.displayed,
            zero_area: self.zero_area,
            attributes: self.attributes.clone(),
            checked: self.checked,
            binding: Mutex::new(Binding {
                selector: binding.selector.clone(),
                handles: binding.handles.clone(),
            }),
        }
    }
}

impl PartialEq for ElementRef {
    fn eq(&self, other: &Self) -> bool {
        self.selector_no_id == other.selector_no_id
            || (self.outer_html == other.outer_html && self.position == other.position)
    }
}

impl Eq for ElementRef {}

impl Hash for ElementRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.selector_no_id.hash(state);
    }
}

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {:?}", self.tag_name, self.selector_no_id)
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.tag_name, self.selector_no_id)
    }
}

#[cfg(test)]
#[path = "element_test.rs"]
mod element_test;
