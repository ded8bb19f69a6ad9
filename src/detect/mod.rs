//! Widget detection by probing.
//!
//! A probe activates one candidate element and diffs the DOM before and after.
//! The shape of the difference classifies the candidate: nothing changed, a
//! list appeared (dropdown), a reversible change confined to the candidate
//! (toggle), a reversible change elsewhere (accordion) or a one-way reveal
//! (disclosure). Probing mutates the page, so the activity is replayed before
//! every probe.

pub mod locator;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::activity::keys::ENTER;
use crate::activity::{Activity, ReplayError, Replayer};
use crate::ancestry::AncestorWalk;
use crate::click::{ClickClassifier, ClickOutcome};
use crate::element::ElementRef;
use crate::interaction::{InteractionKind, retry_interaction};
use crate::session::{NodeDescription, Session, SessionError};

pub use snapshot::{DomSnapshot, EvidenceSummary, WidgetEvidence};

/// Items of a revealed list clicked while refining a dropdown
pub const MAX_DROPDOWN_ITEMS: usize = 10;

const LIST_TAGS: &[&str] = &["ul", "ol"];
const LIST_ROLES: &[&str] = &["listbox", "menu", "menubar", "tree"];
const ITEM_ROLES: &[&str] = &["option", "menuitem", "treeitem"];

#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// How a candidate is activated
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMethod {
    Click,
    /// Enter key sent to the focused candidate
    Enter,
    Hover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropdownFlavor {
    /// A `<select>` element
    Native,
    /// Items lead to other pages
    Navigation,
    /// `role=menu`
    Action,
    /// `role=listbox`
    Listbox,
    SelectorWithoutRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "flavor", rename_all = "snake_case")]
pub enum WidgetKind {
    Dropdown(DropdownFlavor),
    Accordion,
    Toggle,
    Disclosure,
    NotAWidget,
    /// The candidate could not be activated or was lost while probing
    Unclassifiable,
}

/// Classification of one candidate for one activation method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub selector: String,
    pub tag_name: String,
    pub method: ActivationMethod,
    #[serde(flatten)]
    pub kind: WidgetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceSummary>,
}

/// State accumulated over one detection pass
#[derive(Debug)]
pub struct DetectionContext<'a> {
    pub activity: &'a Activity,
    pub detections: Vec<Detection>,
    /// Selectors of candidates lost while probing
    pub excluded: Vec<String>,
    /// Activity replays performed to reset the page
    pub resets: usize,
    seen: HashMap<(String, ActivationMethod), usize>,
}

impl<'a> DetectionContext<'a> {
    pub fn new(activity: &'a Activity) -> Self {
        DetectionContext {
            activity,
            detections: Vec::new(),
            excluded: Vec::new(),
            resets: 0,
            seen: HashMap::new(),
        }
    }

    /// Earlier result for this candidate and method
    pub fn detection(&self, candidate: &ElementRef, method: ActivationMethod) -> Option<&Detection> {
        self.seen
            .get(&(candidate.selector_no_id().to_string(), method))
            .map(|&i| &self.detections[i])
    }

    /// Widgets found so far, excluding non-widgets and unclassifiable candidates
    pub fn widgets(&self) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(|d| !matches!(d.kind, WidgetKind::NotAWidget | WidgetKind::Unclassifiable))
    }

    fn record(
        &mut self,
        candidate: &ElementRef,
        method: ActivationMethod,
        kind: WidgetKind,
        evidence: Option<EvidenceSummary>,
    ) {
        self.seen.insert(
            (candidate.selector_no_id().to_string(), method),
            self.detections.len(),
        );
        self.detections.push(Detection {
            selector: candidate.selector().unwrap_or_else(|| candidate.selector_no_id().to_string()),
            tag_name: candidate.tag_name().to_string(),
            method,
            kind,
            evidence,
        });
    }
}

/// Delays around activations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectTiming {
    /// After scrolling the candidate into view
    pub scroll_settle: Duration,
    /// After a click or Enter, before the second snapshot
    pub reveal_settle: Duration,
    /// After a hover, before the second snapshot
    pub hover_settle: Duration,
}

impl Default for DetectTiming {
    fn default() -> Self {
        Self {
            scroll_settle: Duration::from_millis(500),
            reveal_settle: Duration::from_secs(1),
            hover_settle: Duration::from_secs(3),
        }
    }
}

/// What an activation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Activated,
    /// A navigation or new tab, already undone
    LeftPage(ClickOutcome),
    /// The candidate refused input
    Blocked,
}

/// One activate-and-diff cycle
#[derive(Debug)]
pub enum ProbeOutcome {
    Diffed {
        before: DomSnapshot,
        after: DomSnapshot,
        evidence: WidgetEvidence,
    },
    LeftPage(ClickOutcome),
    Blocked,
}

pub struct WidgetDetector<'a> {
    replayer: &'a Replayer,
    classifier: ClickClassifier,
    timing: DetectTiming,
    max_dropdown_items: usize,
    walk: AncestorWalk,
}

impl<'a> WidgetDetector<'a> {
    pub fn new(replayer: &'a Replayer) -> Self {
        let classifier = ClickClassifier::new(
            replayer.limiter(),
            *replayer.retry(),
            Duration::from_millis(500),
        );
        WidgetDetector {
            replayer,
            classifier,
            timing: DetectTiming::default(),
            max_dropdown_items: MAX_DROPDOWN_ITEMS,
            walk: AncestorWalk::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: ClickClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_timing(mut self, timing: DetectTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_max_dropdown_items(mut self, max: usize) -> Self {
        self.max_dropdown_items = max;
        self
    }

    /// Budget for the list-container lookup above a revealed item
    pub fn with_ancestor_walk(mut self, walk: AncestorWalk) -> Self {
        self.walk = walk;
        self
    }

    /// Replay the activity to restore the page state
    pub async fn reset(
        &self,
        ctx: &mut DetectionContext<'_>,
        session: &mut Arc<dyn Session>,
    ) -> Result<(), DetectError> {
        self.replayer.replay(ctx.activity, session).await?;
        ctx.resets += 1;
        Ok(())
    }

    /// Classify every candidate for every method
    pub async fn detect_all(
        &self,
        ctx: &mut DetectionContext<'_>,
        session: &mut Arc<dyn Session>,
        candidates: &[ElementRef],
        methods: &[ActivationMethod],
    ) -> Result<(), DetectError> {
        for candidate in candidates {
            for &method in methods {
                self.detect(ctx, session, candidate, method).await?;
            }
        }
        info!(
            "Probed {} candidates: {} widgets, {} lost, {} resets",
            candidates.len(),
            ctx.widgets().count(),
            ctx.excluded.len(),
            ctx.resets
        );
        Ok(())
    }

    /// Classify one candidate, resetting the page first
    pub async fn detect(
        &self,
        ctx: &mut DetectionContext<'_>,
        session: &mut Arc<dyn Session>,
        candidate: &ElementRef,
        method: ActivationMethod,
    ) -> Result<WidgetKind, DetectError> {
        if let Some(previous) = ctx.detection(candidate, method) {
            return Ok(previous.kind);
        }
        if candidate.tag_name().eq_ignore_ascii_case("select") {
            let kind = WidgetKind::Dropdown(DropdownFlavor::Native);
            ctx.record(candidate, method, kind, None);
            return Ok(kind);
        }

        self.reset(ctx, session).await?;
        let (kind, evidence) = match self.classify(ctx, session, candidate, method).await {
            Ok(result) => result,
            Err(DetectError::Session(e)) if e.is_lost() => {
                debug!("Candidate {} lost while probing: {}", candidate, e);
                ctx.excluded.push(candidate.selector_no_id().to_string());
                (WidgetKind::Unclassifiable, None)
            }
            Err(e) => return Err(e),
        };
        info!("{} ({:?}) classified as {:?}", candidate, method, kind);
        ctx.record(candidate, method, kind, evidence);
        Ok(kind)
    }

    /// Activate `candidate` once and diff the page around it
    pub async fn probe(
        &self,
        session: &dyn Session,
        candidate: &ElementRef,
        method: ActivationMethod,
    ) -> Result<ProbeOutcome, SessionError> {
        let before = DomSnapshot::capture(session).await?;
        match self.activate(session, candidate, method).await? {
            Activation::Activated => {}
            Activation::LeftPage(outcome) => return Ok(ProbeOutcome::LeftPage(outcome)),
            Activation::Blocked => return Ok(ProbeOutcome::Blocked),
        }
        let after = DomSnapshot::capture(session).await?;
        let evidence = before.diff(&after);
        debug!("Probe of {} produced {:?}", candidate, evidence.summary());
        Ok(ProbeOutcome::Diffed {
            before,
            after,
            evidence,
        })
    }

    async fn classify(
        &self,
        ctx: &mut DetectionContext<'_>,
        session: &mut Arc<dyn Session>,
        candidate: &ElementRef,
        method: ActivationMethod,
    ) -> Result<(WidgetKind, Option<EvidenceSummary>), DetectError> {
        let (before, evidence) = match self.probe(session.as_ref(), candidate, method).await? {
            ProbeOutcome::Diffed {
                before, evidence, ..
            } => (before, evidence),
            ProbeOutcome::LeftPage(_) => return Ok((WidgetKind::NotAWidget, None)),
            ProbeOutcome::Blocked => return Ok((WidgetKind::Unclassifiable, None)),
        };
        let summary = Some(evidence.summary());
        if evidence.is_empty() {
            return Ok((WidgetKind::NotAWidget, summary));
        }

        if evidence.additions().any(is_list_like) {
            let flavor = self
                .refine_dropdown(ctx, session, candidate, method, &evidence)
                .await?;
            return Ok((WidgetKind::Dropdown(flavor), summary));
        }

        // second activation on the same page must undo the first
        let one_way = if evidence.has_additions() {
            WidgetKind::Disclosure
        } else {
            WidgetKind::NotAWidget
        };
        if self.activate(session.as_ref(), candidate, method).await? != Activation::Activated {
            return Ok((one_way, summary));
        }
        let again = DomSnapshot::capture(session.as_ref()).await?;
        let kind = if !evidence.is_reverted(&before, &again) {
            one_way
        } else if evidence.touched().all(|e| e.is_related_to(candidate)) {
            WidgetKind::Toggle
        } else {
            WidgetKind::Accordion
        };
        Ok((kind, summary))
    }

    /// Scroll to `candidate`, activate it and wait for the page to react
    pub async fn activate(
        &self,
        session: &dyn Session,
        candidate: &ElementRef,
        method: ActivationMethod,
    ) -> Result<Activation, SessionError> {
        let handle = candidate.get_element(session).await?;
        session.scroll_into_view(&handle).await?;
        sleep(self.timing.scroll_settle).await;

        let retry = self.replayer.retry();
        let result = match method {
            ActivationMethod::Click => {
                return match candidate.click(session, &self.classifier).await? {
                    ClickOutcome::None | ClickOutcome::Alert => {
                        sleep(self.timing.reveal_settle).await;
                        Ok(Activation::Activated)
                    }
                    ClickOutcome::NonInteractable => Ok(Activation::Blocked),
                    ClickOutcome::Lost => Err(SessionError::ElementLost(
                        candidate.selector_no_id().to_string(),
                    )),
                    outcome => Ok(Activation::LeftPage(outcome)),
                };
            }
            ActivationMethod::Enter => {
                let enter = ENTER.to_string();
                let enter = enter.as_str();
                retry_interaction(retry, InteractionKind::SendKeys, || async move {
                    let handle = candidate.get_element(session).await?;
                    session.send_keys(&handle, enter).await
                })
                .await
                .map(|()| self.timing.reveal_settle)
            }
            ActivationMethod::Hover => {
                retry_interaction(retry, InteractionKind::Hover, || async move {
                    let handle = candidate.get_element(session).await?;
                    session.hover(&handle).await
                })
                .await
                .map(|()| self.timing.hover_settle)
            }
        };
        match result {
            Ok(settle) => {
                sleep(settle).await;
                Ok(Activation::Activated)
            }
            Err(e) if e.is_non_interactable() => Ok(Activation::Blocked),
            Err(e) => Err(e),
        }
    }

    /// Tell selector-like lists from navigation menus by clicking their items
    async fn refine_dropdown(
        &self,
        ctx: &mut DetectionContext<'_>,
        session: &mut Arc<dyn Session>,
        candidate: &ElementRef,
        method: ActivationMethod,
        evidence: &WidgetEvidence,
    ) -> Result<DropdownFlavor, DetectError> {
        let items: Vec<ElementRef> = evidence
            .additions()
            .filter(|e| is_list_item(e))
            .take(self.max_dropdown_items)
            .cloned()
            .collect();
        let role = self.list_role(session.as_ref(), evidence, &items).await?;

        for item in &items {
            self.reset(ctx, session).await?;
            if self.activate(session.as_ref(), candidate, method).await? != Activation::Activated {
                continue;
            }
            match item.click(session.as_ref(), &self.classifier).await? {
                outcome if outcome.is_navigation() => {
                    debug!("Item {} of {} navigates: {:?}", item, candidate, outcome);
                    return Ok(DropdownFlavor::Navigation);
                }
                outcome => debug!("Item {} of {} clicked: {:?}", item, candidate, outcome),
            }
        }

        Ok(match role.as_deref() {
            Some("menu") | Some("menubar") => DropdownFlavor::Action,
            Some("listbox") => DropdownFlavor::Listbox,
            _ => DropdownFlavor::SelectorWithoutRole,
        })
    }

    /// `role` of the list container among the additions, or above the first item
    async fn list_role(
        &self,
        session: &dyn Session,
        evidence: &WidgetEvidence,
        items: &[ElementRef],
    ) -> Result<Option<String>, SessionError> {
        if let Some(container) = evidence.additions().find(|e| is_list_container(e)) {
            return Ok(container.cached_attribute("role").map(str::to_string));
        }
        let Some(first) = items.first() else {
            return Ok(None);
        };
        let container = self
            .walk
            .find(session, first, |d: &NodeDescription| {
                LIST_TAGS.contains(&d.tag_name.as_str())
                    || d.attribute("role").is_some_and(|r| LIST_ROLES.contains(&r))
            })
            .await?;
        Ok(container.and_then(|c| c.cached_attribute("role").map(str::to_string)))
    }
}

fn role_of(element: &ElementRef) -> Option<&str> {
    element.cached_attribute("role")
}

fn is_list_container(element: &ElementRef) -> bool {
    LIST_TAGS.contains(&element.tag_name())
        || role_of(element).is_some_and(|r| LIST_ROLES.contains(&r))
}

fn is_list_item(element: &ElementRef) -> bool {
    element.tag_name() == "li" || role_of(element).is_some_and(|r| ITEM_ROLES.contains(&r))
}

fn is_list_like(element: &ElementRef) -> bool {
    is_list_container(element) || is_list_item(element)
}
