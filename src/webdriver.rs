//! Session capability over a live WebDriver endpoint.
//!
//! [`BrowserConfig`] finds or starts a driver and opens sessions with it;
//! [`WebDriverSession`] adapts a fantoccini client to [`Session`]. Element
//! handles handed to the rest of the crate are uuid keys into a per-session
//! registry of fantoccini elements. Navigating clears the registry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use fantoccini::actions::{InputSource, MouseActions, PointerAction};
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::session::{
    ElementHandle, Locator, NodeDescription, ScriptArg, Session, SessionError, SessionFactory,
    SessionResult,
};
use crate::types::{Rect, ViewportSize};
use crate::webdriver_manager::GLOBAL_WEBDRIVER_MANAGER;

/// Returns one description per element in `arguments[0]`, `null` for detached nodes
const DESCRIBE_JS: &str = r#"
    function segment(el) {
        var tag = el.tagName.toLowerCase();
        if (tag === 'html' || tag === 'head' || tag === 'body') { return tag; }
        var n = 1;
        for (var sib = el.previousElementSibling; sib; sib = sib.previousElementSibling) {
            if (sib.tagName === el.tagName) { n++; }
        }
        return tag + ':nth-of-type(' + n + ')';
    }
    function describe(el) {
        if (!el || !el.isConnected) { return null; }
        var segments = [];
        var selector = null;
        for (var node = el; node && node.nodeType === 1; node = node.parentElement) {
            if (selector === null && node.id) {
                selector = [node.tagName.toLowerCase() + '#' + CSS.escape(node.id)]
                    .concat(segments.slice().reverse())
                    .join(' > ');
            }
            segments.push(segment(node));
        }
        var tag = el.tagName.toLowerCase();
        var r = el.getBoundingClientRect();
        var style = window.getComputedStyle(el);
        var attributes = {};
        for (var i = 0; i < el.attributes.length; i++) {
            attributes[el.attributes[i].name] = el.attributes[i].value;
        }
        return {
            tag_name: tag,
            outer_html: el.outerHTML,
            rect: {
                x: r.left + window.scrollX,
                y: r.top + window.scrollY,
                width: r.width,
                height: r.height
            },
            displayed: style.display !== 'none'
                && style.visibility !== 'hidden'
                && el.getClientRects().length > 0,
            selector_no_id: segments.reverse().join(' > '),
            selector: selector,
            attributes: attributes,
            checked: (tag === 'input' && (el.type === 'checkbox' || el.type === 'radio'))
                ? el.checked
                : (tag === 'option' ? el.selected : null)
        };
    }
    return arguments[0].map(describe);
"#;

/// Supported browser types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    /// Mozilla Firefox
    Firefox,
    /// Google Chrome/Chromium
    Chrome,
}

impl std::str::FromStr for BrowserType {
    type Err = anyhow::Error;

    /// Parse browser type from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "firefox" => Ok(BrowserType::Firefox),
            "chrome" | "chromium" => Ok(BrowserType::Chrome),
            _ => anyhow::bail!("Unsupported browser: {}", s),
        }
    }
}

impl BrowserType {
    /// Executable serving the WebDriver protocol for this browser
    pub fn driver_binary(&self) -> &'static str {
        match self {
            BrowserType::Firefox => "geckodriver",
            BrowserType::Chrome => "chromedriver",
        }
    }

    /// Ports tried before asking the OS for a free one
    pub fn preferred_ports(&self) -> [u16; 3] {
        match self {
            BrowserType::Firefox => [4444, 4445, 4446],
            BrowserType::Chrome => [9515, 9516, 9517],
        }
    }

    /// Where an externally started driver usually listens
    pub fn get_webdriver_url(&self) -> String {
        match self {
            BrowserType::Firefox => "http://localhost:4444".to_string(),
            BrowserType::Chrome => {
                // chromedriver logs the port it actually bound
                for log_file in &["/tmp/chromedriver_new.log", "/tmp/chromedriver.log"] {
                    if let Ok(log) = std::fs::read_to_string(log_file)
                        && let Some(port) = chromedriver_log_port(&log)
                    {
                        return format!("http://localhost:{port}");
                    }
                }
                "http://localhost:9515".to_string()
            }
        }
    }
}

fn chromedriver_log_port(log: &str) -> Option<u16> {
    log.lines()
        .find(|l| l.contains("ChromeDriver was started successfully on port"))
        .and_then(|line| line.split("port ").nth(1))
        .and_then(|s| s.trim().trim_end_matches('.').parse::<u16>().ok())
}

/// How to reach a browser; also the factory for fresh sessions
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserConfig {
    pub browser: BrowserType,
    pub headless: bool,
    pub viewport: Option<ViewportSize>,
    /// Fixed endpoint; when absent a driver is discovered or started
    pub webdriver_url: Option<String>,
}

impl BrowserConfig {
    pub fn new(browser: BrowserType) -> Self {
        BrowserConfig {
            browser,
            headless: true,
            viewport: None,
            webdriver_url: None,
        }
    }

    /// W3C capabilities for a new session
    pub fn capabilities(&self, profile_dir: Option<&Path>) -> serde_json::Map<String, Value> {
        let mut caps = serde_json::Map::new();
        match self.browser {
            BrowserType::Firefox => {
                let mut args = Vec::new();
                if self.headless {
                    args.push("--headless".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--width={}", vp.width));
                    args.push(format!("--height={}", vp.height));
                }
                caps.insert("moz:firefoxOptions".to_string(), json!({ "args": args }));
            }
            BrowserType::Chrome => {
                let mut args = vec!["--no-sandbox".to_string()];
                if self.headless {
                    args.push("--headless=new".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push("--disable-dev-shm-usage".to_string());
                }
                if let Some(vp) = &self.viewport {
                    args.push(format!("--window-size={},{}", vp.width, vp.height));
                }
                if let Some(dir) = profile_dir {
                    args.push(format!("--user-data-dir={}", dir.display()));
                }
                caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
            }
        }
        caps
    }

    async fn driver_url(&self) -> Result<String> {
        match &self.webdriver_url {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => GLOBAL_WEBDRIVER_MANAGER.ensure_driver(&self.browser).await,
        }
    }

    /// Open a new browser session
    pub async fn connect(&self) -> Result<WebDriverSession> {
        info!("Connecting to {:?} WebDriver", self.browser);
        let webdriver_url = self.driver_url().await?;

        if !crate::webdriver_manager::is_driver_running(&webdriver_url).await {
            anyhow::bail!(
                "Failed to connect to WebDriver at {}.\n\
                Please ensure {} is running or set {}",
                webdriver_url,
                self.browser.driver_binary(),
                crate::config::ENV_WEBDRIVER_URL
            );
        }

        // Chrome refuses to share a user-data-dir between sessions
        let profile = match self.browser {
            BrowserType::Chrome => Some(
                tempfile::Builder::new()
                    .prefix("a11yprobe-chrome-")
                    .tempdir()
                    .context("Failed to create Chrome profile directory")?,
            ),
            BrowserType::Firefox => None,
        };
        let caps = self.capabilities(profile.as_ref().map(TempDir::path));

        debug!("Connecting to WebDriver at {}", webdriver_url);
        let client = match ClientBuilder::rustls()
            .capabilities(caps.clone())
            .connect(&webdriver_url)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                let error_str = e.to_string();
                let stuck = error_str.contains("Session is already started")
                    || error_str.contains("session not created");
                if !stuck || self.webdriver_url.is_some() {
                    return Err(e).context("Failed to connect to WebDriver");
                }
                info!("WebDriver appears to be in a bad state, restarting it");
                GLOBAL_WEBDRIVER_MANAGER.kill_driver(&self.browser);
                tokio::time::sleep(Duration::from_millis(500)).await;
                let new_url = GLOBAL_WEBDRIVER_MANAGER
                    .ensure_driver(&self.browser)
                    .await
                    .context("Failed to restart WebDriver after recovery")?;
                ClientBuilder::rustls()
                    .capabilities(caps)
                    .connect(&new_url)
                    .await
                    .context("Failed to connect to WebDriver after restart")?
            }
        };

        if let Some(vp) = self.viewport {
            debug!("Setting viewport to {}", vp);
            if let Err(e) = client.set_window_size(vp.width, vp.height).await {
                debug!("Could not set window size: {}", e);
            }
        }

        Ok(WebDriverSession::new(client, profile))
    }
}

#[async_trait]
impl SessionFactory for BrowserConfig {
    async fn create(&self) -> SessionResult<Arc<dyn Session>> {
        let session = self
            .connect()
            .await
            .map_err(|e| SessionError::ConnectionLost(format!("{e:#}")))?;
        Ok(Arc::new(session))
    }
}

/// A fantoccini client behind the [`Session`] trait
pub struct WebDriverSession {
    id: String,
    client: Client,
    elements: DashMap<String, Element>,
    /// Removed when the session is dropped
    _profile: Option<TempDir>,
}

impl WebDriverSession {
    pub fn new(client: Client, profile: Option<TempDir>) -> Self {
        WebDriverSession {
            id: uuid::Uuid::new_v4().to_string(),
            client,
            elements: DashMap::new(),
            _profile: profile,
        }
    }

    fn register(&self, element: Element) -> ElementHandle {
        let key = uuid::Uuid::new_v4().to_string();
        self.elements.insert(key.clone(), element);
        ElementHandle(key)
    }

    fn element(&self, handle: &ElementHandle) -> SessionResult<Element> {
        self.elements
            .get(handle.as_str())
            .map(|e| e.value().clone())
            .ok_or_else(|| SessionError::StaleElement(handle.as_str().to_string()))
    }

    fn script_arg(&self, arg: ScriptArg) -> SessionResult<Value> {
        let element_value = |handle: &ElementHandle| -> SessionResult<Value> {
            serde_json::to_value(self.element(handle)?)
                .map_err(|e| SessionError::Other(e.to_string()))
        };
        match arg {
            ScriptArg::Json(value) => Ok(value),
            ScriptArg::Element(handle) => element_value(&handle),
            ScriptArg::Elements(handles) => handles
                .iter()
                .map(element_value)
                .collect::<SessionResult<Vec<_>>>()
                .map(Value::Array),
        }
    }

    async fn move_to(&self, element: &ElementHandle, x: i64, y: i64) -> SessionResult<()> {
        let element = self.element(element)?;
        let actions = MouseActions::new("mouse".to_string()).then(PointerAction::MoveToElement {
            element,
            duration: Some(Duration::from_millis(100)),
            x,
            y,
        });
        self.client.perform_actions(actions).await.map_err(map_error)
    }
}

fn to_fantoccini(locator: &Locator) -> fantoccini::Locator<'_> {
    match locator {
        Locator::Css(s) => fantoccini::Locator::Css(s.as_str()),
        Locator::XPath(s) => fantoccini::Locator::XPath(s.as_str()),
        Locator::Id(s) => fantoccini::Locator::Id(s.as_str()),
        Locator::LinkText(s) => fantoccini::Locator::LinkText(s.as_str()),
    }
}

/// Translate a WebDriver failure into the crate's error taxonomy
fn map_error(err: CmdError) -> SessionError {
    let message = err.to_string();
    match &err {
        CmdError::NoSuchElement(_) => SessionError::NoSuchElement(message),
        CmdError::NoSuchWindow(_) => SessionError::NoSuchWindow(message),
        CmdError::Standard(wd) => error_for_code(wd.error(), message),
        CmdError::Lost(_) | CmdError::Failed(_) => SessionError::ConnectionLost(message),
        _ if message.contains("connection") => SessionError::ConnectionLost(message),
        _ => SessionError::Other(message),
    }
}

/// Map a W3C error code to the crate's error taxonomy
fn error_for_code(code: &str, message: String) -> SessionError {
    match code {
        "no such element" => SessionError::NoSuchElement(message),
        "stale element reference" => SessionError::StaleElement(message),
        "element not interactable" | "invalid element state" => {
            SessionError::NotInteractable(message)
        }
        "element click intercepted" => SessionError::ClickIntercepted(message),
        "timeout" | "script timeout" => SessionError::Timeout(message),
        "no such window" => SessionError::NoSuchWindow(message),
        "unexpected alert open" => SessionError::UnexpectedAlert(message),
        "javascript error" => SessionError::Javascript(message),
        "invalid session id" | "session not created" => SessionError::InvalidSession(message),
        _ => SessionError::Other(message),
    }
}

#[async_trait]
impl Session for WebDriverSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&self, url: &str) -> SessionResult<()> {
        debug!("Navigating to {}", url);
        self.elements.clear();
        self.client.goto(url).await.map_err(map_error)
    }

    async fn current_url(&self) -> SessionResult<String> {
        self.client
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(map_error)
    }

    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> SessionResult<Value> {
        let args = args
            .into_iter()
            .map(|arg| self.script_arg(arg))
            .collect::<SessionResult<Vec<_>>>()?;
        self.client.execute(script, args).await.map_err(map_error)
    }

    async fn find(&self, locator: &Locator) -> SessionResult<Option<ElementHandle>> {
        match self.client.find(to_fantoccini(locator)).await {
            Ok(element) => Ok(Some(self.register(element))),
            Err(e) if e.is_miss() => Ok(None),
            Err(e) => match map_error(e) {
                SessionError::NoSuchElement(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn find_all(&self, locator: &Locator) -> SessionResult<Vec<ElementHandle>> {
        let found = self
            .client
            .find_all(to_fantoccini(locator))
            .await
            .map_err(map_error)?;
        Ok(found.into_iter().map(|e| self.register(e)).collect())
    }

    async fn find_all_within(
        &self,
        parent: &ElementHandle,
        locator: &Locator,
    ) -> SessionResult<Vec<ElementHandle>> {
        let found = self
            .element(parent)?
            .find_all(to_fantoccini(locator))
            .await
            .map_err(map_error)?;
        Ok(found.into_iter().map(|e| self.register(e)).collect())
    }

    async fn window_handles(&self) -> SessionResult<Vec<String>> {
        let handles = self.client.windows().await.map_err(map_error)?;
        Ok(handles.into_iter().map(String::from).collect())
    }

    async fn current_window(&self) -> SessionResult<String> {
        self.client
            .window()
            .await
            .map(String::from)
            .map_err(map_error)
    }

    async fn switch_to_window(&self, handle: &str) -> SessionResult<()> {
        let handle = WindowHandle::try_from(handle.to_string())
            .map_err(|e| SessionError::NoSuchWindow(e.to_string()))?;
        self.client.switch_to_window(handle).await.map_err(map_error)
    }

    async fn close_window(&self) -> SessionResult<()> {
        self.client.close_window().await.map_err(map_error)
    }

    async fn new_tab(&self) -> SessionResult<String> {
        let created = self.client.new_window(true).await.map_err(map_error)?;
        self.client
            .switch_to_window(created.handle.clone())
            .await
            .map_err(map_error)?;
        Ok(String::from(created.handle))
    }

    async fn set_window_size(&self, width: u32, height: u32) -> SessionResult<()> {
        self.client
            .set_window_size(width, height)
            .await
            .map_err(map_error)
    }

    async fn maximize_window(&self) -> SessionResult<()> {
        self.client.maximize_window().await.map_err(map_error)
    }

    async fn switch_to_frame(&self, index: u16) -> SessionResult<()> {
        self.client.enter_frame(Some(index)).await.map_err(map_error)
    }

    async fn switch_to_parent_frame(&self) -> SessionResult<()> {
        self.client.enter_parent_frame().await.map_err(map_error)
    }

    async fn switch_to_default_content(&self) -> SessionResult<()> {
        self.client.enter_frame(None).await.map_err(map_error)
    }

    async fn dismiss_alert(&self) -> SessionResult<bool> {
        match self.client.dismiss_alert().await {
            Ok(()) => Ok(true),
            Err(CmdError::NoSuchAlert(_)) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn quit(&self) -> SessionResult<()> {
        self.elements.clear();
        self.client.clone().close().await.map_err(map_error)
    }

    async fn click(&self, element: &ElementHandle) -> SessionResult<()> {
        self.element(element)?.click().await.map_err(map_error)
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> SessionResult<()> {
        self.element(element)?
            .send_keys(text)
            .await
            .map_err(map_error)
    }

    async fn hover(&self, element: &ElementHandle) -> SessionResult<()> {
        self.move_to(element, 0, 0).await
    }

    async fn move_pointer_by(
        &self,
        element: &ElementHandle,
        dx: i32,
        dy: i32,
    ) -> SessionResult<()> {
        self.move_to(element, i64::from(dx), i64::from(dy)).await
    }

    async fn tag_name(&self, element: &ElementHandle) -> SessionResult<String> {
        self.element(element)?
            .tag_name()
            .await
            .map(|t| t.to_lowercase())
            .map_err(map_error)
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> SessionResult<Option<String>> {
        self.element(element)?.attr(name).await.map_err(map_error)
    }

    async fn text(&self, element: &ElementHandle) -> SessionResult<String> {
        self.element(element)?.text().await.map_err(map_error)
    }

    async fn rect(&self, element: &ElementHandle) -> SessionResult<Rect> {
        let (x, y, width, height) = self
            .element(element)?
            .rectangle()
            .await
            .map_err(map_error)?;
        Ok(Rect::new(x, y, width, height))
    }

    async fn is_displayed(&self, element: &ElementHandle) -> SessionResult<bool> {
        self.element(element)?
            .is_displayed()
            .await
            .map_err(map_error)
    }

    async fn parent(&self, element: &ElementHandle) -> SessionResult<Option<ElementHandle>> {
        let element = self.element(element)?;
        match element.find(fantoccini::Locator::XPath("..")).await {
            Ok(parent) => Ok(Some(self.register(parent))),
            Err(e) => match map_error(e) {
                // The parent of <html> is the document, which is not an element
                e if e.is_connection() || matches!(e, SessionError::StaleElement(_)) => Err(e),
                _ => Ok(None),
            },
        }
    }

    async fn describe(&self, element: &ElementHandle) -> SessionResult<NodeDescription> {
        let mut described = describe_batch(self, std::slice::from_ref(element)).await?;
        described
            .pop()
            .unwrap_or_else(|| Err(SessionError::StaleElement(element.as_str().to_string())))
    }

    async fn describe_many(
        &self,
        elements: &[ElementHandle],
    ) -> SessionResult<Vec<SessionResult<NodeDescription>>> {
        match describe_batch(self, elements).await {
            Ok(described) => Ok(described),
            Err(e) if e.is_connection() => Err(e),
            Err(e) => {
                // One stale node fails the whole batch; fall back to one call per node
                debug!("Batch describe failed ({}), describing one by one", e);
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    match self.describe(element).await {
                        Err(e) if e.is_connection() => return Err(e),
                        other => out.push(other),
                    }
                }
                Ok(out)
            }
        }
    }

    async fn select_by_index(&self, element: &ElementHandle, index: usize) -> SessionResult<()> {
        self.element(element)?
            .select_by_index(index)
            .await
            .map_err(map_error)
    }

    async fn select_by_value(&self, element: &ElementHandle, value: &str) -> SessionResult<()> {
        self.element(element)?
            .select_by_value(value)
            .await
            .map_err(map_error)
    }

    async fn select_by_label(&self, element: &ElementHandle, label: &str) -> SessionResult<()> {
        self.element(element)?
            .select_by_label(label)
            .await
            .map_err(map_error)
    }
}

async fn describe_batch(
    session: &WebDriverSession,
    elements: &[ElementHandle],
) -> SessionResult<Vec<SessionResult<NodeDescription>>> {
    let value = session
        .execute_script(DESCRIBE_JS, vec![ScriptArg::Elements(elements.to_vec())])
        .await?;
    let described: Vec<Option<NodeDescription>> = serde_json::from_value(value)
        .map_err(|e| SessionError::Javascript(format!("unexpected describe result: {e}")))?;
    if described.len() != elements.len() {
        warn!(
            "Described {} of {} elements",
            described.len(),
            elements.len()
        );
    }
    Ok(elements
        .iter()
        .zip(described.into_iter().chain(std::iter::repeat(None)))
        .map(|(handle, description)| {
            description.ok_or_else(|| SessionError::StaleElement(handle.as_str().to_string()))
        })
        .collect())
}

#[cfg(test)]
#[path = "webdriver_test.rs"]
mod webdriver_test;
