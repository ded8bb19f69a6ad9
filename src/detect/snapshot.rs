//! DOM snapshots and the evidence extracted by diffing two of them.

use std::collections::HashMap;
use tracing::debug;

use crate::element::ElementRef;
use crate::session::{Locator, Session, SessionResult};

/// Every element under `<body>`
pub const SNAPSHOT_XPATH: &str = "//body//*";

/// Element references observed at one instant
#[derive(Debug, Clone, Default)]
pub struct DomSnapshot {
    elements: Vec<ElementRef>,
    by_selector: HashMap<String, usize>,
}

impl DomSnapshot {
    pub async fn capture(session: &dyn Session) -> SessionResult<Self> {
        let handles = session
            .find_all(&Locator::XPath(SNAPSHOT_XPATH.to_string()))
            .await?;
        let elements = ElementRef::from_handles(session, handles).await?;
        let snapshot = Self::from_elements(elements);
        debug!(
            "Captured {} elements ({} visible, {} hidden)",
            snapshot.len(),
            snapshot.visible().count(),
            snapshot.hidden().count()
        );
        Ok(snapshot)
    }

    pub fn from_elements(elements: Vec<ElementRef>) -> Self {
        let by_selector = elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.selector_no_id().to_string(), i))
            .collect();
        DomSnapshot {
            elements,
            by_selector,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[ElementRef] {
        &self.elements
    }

    /// Displayed with a non-zero area
    pub fn visible(&self) -> impl Iterator<Item = &ElementRef> {
        self.elements.iter().filter(|e| e.was_visible())
    }

    /// Hidden or zero-area
    pub fn hidden(&self) -> impl Iterator<Item = &ElementRef> {
        self.elements.iter().filter(|e| !e.was_visible())
    }

    /// The snapshot's reference equal to `element`
    pub fn get(&self, element: &ElementRef) -> Option<&ElementRef> {
        match self.by_selector.get(element.selector_no_id()) {
            Some(&i) => Some(&self.elements[i]),
            None => self.elements.iter().find(|e| *e == element),
        }
    }

    /// Outer HTML and checked state of `element` if it was present and visible
    fn visible_state(&self, element: &ElementRef) -> Option<(&str, Option<bool>)> {
        self.get(element)
            .filter(|e| e.was_visible())
            .map(|e| (e.outer_html(), e.checked()))
    }

    /// What changed between this snapshot and `after`
    pub fn diff(&self, after: &DomSnapshot) -> WidgetEvidence {
        let mut evidence = WidgetEvidence::default();
        for element in &after.elements {
            match self.get(element) {
                None => evidence.created.push(element.clone()),
                Some(before) if !before.was_visible() && element.was_visible() => {
                    evidence.revealed.push(element.clone())
                }
                Some(before)
                    if before.outer_html() != element.outer_html()
                        || before.checked() != element.checked() =>
                {
                    evidence.changed.push(element.clone())
                }
                Some(_) => {}
            }
        }
        evidence.removed = self
            .elements
            .iter()
            .filter(|e| after.get(e).is_none())
            .cloned()
            .collect();
        evidence
    }
}

/// Result of one activate-and-diff cycle; never reused across probes
#[derive(Debug, Clone, Default)]
pub struct WidgetEvidence {
    /// Present after activation only
    pub created: Vec<ElementRef>,
    /// Hidden or zero-area before, visible after
    pub revealed: Vec<ElementRef>,
    pub removed: Vec<ElementRef>,
    /// Present in both with different outer HTML or checked state
    pub changed: Vec<ElementRef>,
}

impl WidgetEvidence {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.revealed.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
    }

    /// Visible elements the activation added to the page
    pub fn additions(&self) -> impl Iterator<Item = &ElementRef> {
        self.created
            .iter()
            .filter(|e| e.was_visible())
            .chain(self.revealed.iter())
    }

    pub fn has_additions(&self) -> bool {
        self.additions().next().is_some()
    }

    /// Every element the evidence mentions
    pub fn touched(&self) -> impl Iterator<Item = &ElementRef> {
        self.created
            .iter()
            .chain(&self.revealed)
            .chain(&self.removed)
            .chain(&self.changed)
    }

    /// A further activation brought every touched element back to its state in `before`
    pub fn is_reverted(&self, before: &DomSnapshot, again: &DomSnapshot) -> bool {
        !self.is_empty()
            && self
                .touched()
                .all(|e| before.visible_state(e) == again.visible_state(e))
    }

    pub fn summary(&self) -> EvidenceSummary {
        EvidenceSummary {
            created: self.created.len(),
            revealed: self.revealed.len(),
            removed: self.removed.len(),
            changed: self.changed.len(),
        }
    }
}

/// Element counts of a [`WidgetEvidence`], kept after the evidence is dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct EvidenceSummary {
    pub created: usize,
    pub revealed: usize,
    pub removed: usize,
    pub changed: usize,
}
