//! Click an element and classify what the click did.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::element::ElementRef;
use crate::interaction::{InteractionKind, RetryPolicy, retry_interaction};
use crate::rate_limiter::RateLimit;
use crate::session::{Session, SessionResult};

/// Neutralize print dialogs, which would block the session
const PRINT_PATCH: &str = r#"
    window.print = function() { console.warn("print suppressed"); };
    Window.prototype.print = window.print;
    if (!window.__a11yprobe_open_patched) {
        window.__a11yprobe_open_patched = true;
        var originalOpen = window.open;
        window.open = function() {
            var w = originalOpen.apply(window, arguments);
            if (w) { w.print = window.print; }
            return w;
        };
    }
"#;

/// Side effect of a single click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum ClickOutcome {
    /// Nothing observable beyond possible in-page changes
    None,
    /// A native dialog opened and was dismissed
    Alert,
    /// A new window or tab opened; it was closed again
    NewTab { url: String },
    /// The page navigated away; the original URL was restored
    PageChange { url: String },
    NonInteractable,
    Lost,
}

impl ClickOutcome {
    /// The click left the page, so in-page state did not change
    pub fn is_navigation(&self) -> bool {
        matches!(self, ClickOutcome::NewTab { .. } | ClickOutcome::PageChange { .. })
    }
}

/// Clicks elements and normalizes the side effect into a [`ClickOutcome`]
#[derive(Clone)]
pub struct ClickClassifier {
    limiter: Arc<dyn RateLimit>,
    retry: RetryPolicy,
    settle: Duration,
}

impl ClickClassifier {
    pub fn new(limiter: Arc<dyn RateLimit>, retry: RetryPolicy, settle: Duration) -> Self {
        Self {
            limiter,
            retry,
            settle,
        }
    }

    /// Click `element` and classify the result
    ///
    /// Interaction failures become outcomes; only session-level failures are
    /// returned as errors. A navigation away is undone before returning.
    pub async fn click(
        &self,
        element: &ElementRef,
        session: &dyn Session,
    ) -> SessionResult<ClickOutcome> {
        self.limiter.delay_access(false, 1).await;

        let original_window = session.current_window().await?;
        let previous_url = session.current_url().await?;

        if let Err(e) = session
            .execute_script(PRINT_PATCH, Vec::new())
            .await
        {
            if e.is_connection() {
                return Err(e);
            }
            debug!("Could not patch window.print: {}", e);
        }

        let clicked = retry_interaction(&self.retry, InteractionKind::Click, || async move {
            let handle = element.get_element(session).await?;
            session.click(&handle).await
        })
        .await;

        match clicked {
            Ok(()) => {}
            Err(e) if e.is_non_interactable() => {
                debug!("Click on {} not interactable: {}", element, e);
                return Ok(ClickOutcome::NonInteractable);
            }
            Err(e) if e.is_lost() => {
                debug!("Element {} lost during click: {}", element, e);
                return Ok(ClickOutcome::Lost);
            }
            Err(e) => return Err(e),
        }

        sleep(self.settle).await;

        let alert = session.dismiss_alert().await?;
        if alert {
            debug!("Click on {} raised an alert", element);
        }

        if let Some(url) = self.close_new_windows(session, &original_window).await? {
            info!("Click on {} opened a new tab: {}", element, url);
            return Ok(ClickOutcome::NewTab { url });
        }

        let current_url = session.current_url().await?;
        if current_url != previous_url && !is_same_page(&current_url, &previous_url) {
            if !is_same_site(&current_url, &previous_url) {
                self.limiter.register_request(1).await;
            }
            info!(
                "Click on {} navigated to {}, restoring {}",
                element, current_url, previous_url
            );
            session.navigate(&previous_url).await?;
            sleep(self.settle).await;
            return Ok(ClickOutcome::PageChange { url: current_url });
        }

        Ok(if alert {
            ClickOutcome::Alert
        } else {
            ClickOutcome::None
        })
    }

    /// Close every window other than `original`, returning the first one's URL
    async fn close_new_windows(
        &self,
        session: &dyn Session,
        original: &str,
    ) -> SessionResult<Option<String>> {
        let extra: Vec<String> = session
            .window_handles()
            .await?
            .into_iter()
            .filter(|h| h != original)
            .collect();
        if extra.is_empty() {
            return Ok(None);
        }

        let mut first_url = None;
        for handle in &extra {
            session.switch_to_window(handle).await?;
            let url = session.current_url().await?;
            first_url.get_or_insert(url);
            if let Err(e) = session.close_window().await {
                warn!("Failed to close window {}: {}", handle, e);
            }
        }
        session.switch_to_window(original).await?;
        Ok(first_url)
    }
}

/// Scheme, host, port and path all match
pub fn is_same_page(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
                && a.path() == b.path()
        }
        _ => a == b,
    }
}

/// Scheme, host and port match
pub fn is_same_site(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => a == b,
    }
}

#[cfg(test)]
#[path = "click_test.rs"]
mod click_test;
