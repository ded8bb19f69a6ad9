//! Browser session capability.
//!
//! Everything above this module talks to the browser through the [`Session`]
//! trait. The live implementation lives in [`crate::webdriver`]; unit tests use
//! an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::types::Rect;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Poll interval for explicit waits
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors reported by a browser session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("stale element reference: {0}")]
    StaleElement(String),
    #[error("element not interactable: {0}")]
    NotInteractable(String),
    #[error("element click intercepted: {0}")]
    ClickIntercepted(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("no such window: {0}")]
    NoSuchWindow(String),
    #[error("unexpected alert open: {0}")]
    UnexpectedAlert(String),
    #[error("javascript error: {0}")]
    Javascript(String),
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("connection error: {0}")]
    ConnectionLost(String),
    /// Neither the id-qualified nor the structural selector resolves any more
    #[error("element lost: {0}")]
    ElementLost(String),
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// The browser session is dead; only a fresh session can continue
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidSession(_) | SessionError::ConnectionLost(_)
        )
    }

    /// The addressed node is gone or its handle went stale
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            SessionError::NoSuchElement(_)
                | SessionError::StaleElement(_)
                | SessionError::ElementLost(_)
        )
    }

    /// The node exists but cannot receive input right now
    pub fn is_non_interactable(&self) -> bool {
        matches!(
            self,
            SessionError::NotInteractable(_) | SessionError::ClickIntercepted(_)
        )
    }
}

/// Opaque live handle to a DOM node, valid until the session invalidates it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        ElementHandle(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Script argument: plain JSON or a live element
#[derive(Debug, Clone)]
pub enum ScriptArg {
    Json(Value),
    Element(ElementHandle),
    Elements(Vec<ElementHandle>),
}

/// Element lookup strategy understood by every session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
    Id(String),
    LinkText(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    /// Parse a recorded target such as `css=#menu` or `xpath=//a[1]`
    pub fn parse(target: &str) -> Result<Self, LocatorError> {
        let Some((strategy, value)) = target.split_once('=') else {
            return Err(LocatorError::MissingStrategy(target.to_string()));
        };
        let strategy = LocatorStrategy::from_token(strategy)
            .ok_or_else(|| LocatorError::UnknownStrategy(strategy.to_string()))?;
        if value.is_empty() {
            return Err(LocatorError::EmptyValue(target.to_string()));
        }
        Ok(strategy.locator(value))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={s}"),
            Locator::XPath(s) => write!(f, "xpath={s}"),
            Locator::Id(s) => write!(f, "id={s}"),
            Locator::LinkText(s) => write!(f, "linkText={s}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("target '{0}' has no locator strategy")]
    MissingStrategy(String),
    #[error("unsupported locator strategy '{0}'")]
    UnknownStrategy(String),
    #[error("target '{0}' has an empty locator")]
    EmptyValue(String),
}

/// Locator strategies accepted in recorded scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    Css,
    XPath,
    Id,
    Name,
    LinkText,
    ClassName,
    TagName,
}

const LOCATOR_STRATEGIES: &[(&str, LocatorStrategy)] = &[
    ("css", LocatorStrategy::Css),
    ("xpath", LocatorStrategy::XPath),
    ("id", LocatorStrategy::Id),
    ("name", LocatorStrategy::Name),
    ("linkText", LocatorStrategy::LinkText),
    ("link", LocatorStrategy::LinkText),
    ("className", LocatorStrategy::ClassName),
    ("tagName", LocatorStrategy::TagName),
];

impl LocatorStrategy {
    pub fn from_token(token: &str) -> Option<Self> {
        LOCATOR_STRATEGIES
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, strategy)| *strategy)
    }

    pub fn locator(self, value: &str) -> Locator {
        match self {
            LocatorStrategy::Css => Locator::Css(value.to_string()),
            LocatorStrategy::XPath => Locator::XPath(value.to_string()),
            LocatorStrategy::Id => Locator::Id(value.to_string()),
            LocatorStrategy::Name => Locator::Css(format!("[name=\"{value}\"]")),
            LocatorStrategy::LinkText => Locator::LinkText(value.to_string()),
            LocatorStrategy::ClassName => Locator::Css(format!(".{value}")),
            LocatorStrategy::TagName => Locator::Css(value.to_string()),
        }
    }
}

/// Everything the core needs to know about a node at observation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub tag_name: String,
    pub outer_html: String,
    pub rect: Rect,
    pub displayed: bool,
    /// Structural `tag:nth-of-type(n)` path from the document root
    pub selector_no_id: String,
    /// Same path cut at the nearest ancestor carrying an id, if any
    pub selector: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// `checked` property of checkbox and radio inputs, `selected` of options
    #[serde(default)]
    pub checked: Option<bool>,
}

impl NodeDescription {
    /// Visible with a non-zero area
    pub fn is_visible(&self) -> bool {
        self.displayed && !self.rect.is_zero_area()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A live browser session
///
/// Queries that may legitimately find nothing return `Option`/`Vec`; errors
/// are reserved for stale handles, blocked input and dead sessions.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identity used to memoize element handles per session
    fn id(&self) -> &str;

    async fn navigate(&self, url: &str) -> SessionResult<()>;
    async fn current_url(&self) -> SessionResult<String>;
    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> SessionResult<Value>;

    async fn find(&self, locator: &Locator) -> SessionResult<Option<ElementHandle>>;
    async fn find_all(&self, locator: &Locator) -> SessionResult<Vec<ElementHandle>>;
    async fn find_all_within(
        &self,
        parent: &ElementHandle,
        locator: &Locator,
    ) -> SessionResult<Vec<ElementHandle>>;

    async fn window_handles(&self) -> SessionResult<Vec<String>>;
    async fn current_window(&self) -> SessionResult<String>;
    async fn switch_to_window(&self, handle: &str) -> SessionResult<()>;
    /// Close the current window; the session has no current window afterwards
    async fn close_window(&self) -> SessionResult<()>;
    /// Open a blank tab, switch to it and return its handle
    async fn new_tab(&self) -> SessionResult<String>;
    async fn set_window_size(&self, width: u32, height: u32) -> SessionResult<()>;
    async fn maximize_window(&self) -> SessionResult<()>;

    async fn switch_to_frame(&self, index: u16) -> SessionResult<()>;
    async fn switch_to_parent_frame(&self) -> SessionResult<()>;
    async fn switch_to_default_content(&self) -> SessionResult<()>;

    /// Dismiss a native dialog; `false` when none was open
    async fn dismiss_alert(&self) -> SessionResult<bool>;
    async fn quit(&self) -> SessionResult<()>;

    async fn click(&self, element: &ElementHandle) -> SessionResult<()>;
    async fn send_keys(&self, element: &ElementHandle, text: &str) -> SessionResult<()>;
    /// Move the pointer to the element's center
    async fn hover(&self, element: &ElementHandle) -> SessionResult<()>;
    /// Move the pointer to an offset from the element's center
    async fn move_pointer_by(&self, element: &ElementHandle, dx: i32, dy: i32)
    -> SessionResult<()>;

    async fn tag_name(&self, element: &ElementHandle) -> SessionResult<String>;
    async fn attribute(&self, element: &ElementHandle, name: &str) -> SessionResult<Option<String>>;
    async fn text(&self, element: &ElementHandle) -> SessionResult<String>;
    async fn rect(&self, element: &ElementHandle) -> SessionResult<Rect>;
    async fn is_displayed(&self, element: &ElementHandle) -> SessionResult<bool>;
    async fn parent(&self, element: &ElementHandle) -> SessionResult<Option<ElementHandle>>;
    async fn describe(&self, element: &ElementHandle) -> SessionResult<NodeDescription>;

    async fn select_by_index(&self, element: &ElementHandle, index: usize) -> SessionResult<()>;
    async fn select_by_value(&self, element: &ElementHandle, value: &str) -> SessionResult<()>;
    async fn select_by_label(&self, element: &ElementHandle, label: &str) -> SessionResult<()>;

    /// Describe many nodes; nodes that vanish meanwhile yield an error entry
    async fn describe_many(
        &self,
        elements: &[ElementHandle],
    ) -> SessionResult<Vec<SessionResult<NodeDescription>>> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match self.describe(element).await {
                Err(e) if e.is_connection() => return Err(e),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> SessionResult<()> {
        self.execute_script(
            "arguments[0].scrollIntoView();",
            vec![ScriptArg::Element(element.clone())],
        )
        .await
        .map(|_| ())
    }

    async fn window_name(&self) -> SessionResult<String> {
        let value = self.execute_script("return window.name;", vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Wait until the locator resolves to a displayed node
    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> SessionResult<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.find(locator).await? {
                match self.is_displayed(&handle).await {
                    Ok(true) => return Ok(Some(handle)),
                    Ok(false) => {}
                    Err(e) if e.is_lost() => {}
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Creates fresh sessions, used when a replay restarts after a dead session
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> SessionResult<std::sync::Arc<dyn Session>>;
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
