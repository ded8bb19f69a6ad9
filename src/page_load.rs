//! Wait for network activity to quiesce after a navigation or state change.
//!
//! The gate polls `performance.getEntries()` and counts consecutive polls that
//! saw no newly completed resource. It never fails: a page that does not
//! settle in time is reported and the caller carries on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::session::{Session, SessionError};

const PERFORMANCE_ENTRIES_JS: &str = r#"
    var performance =
        window.performance ||
        window.mozPerformance ||
        window.msPerformance ||
        window.webkitPerformance ||
        {};
    if (!performance.getEntries) { return []; }
    return performance.getEntries().map(function (entry) {
        return { url: entry.name, end: entry.responseEnd };
    });
"#;

/// Polling parameters for [`wait_for_page_load`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLoadConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive polls without a new completion that count as quiescence
    pub max_idle_polls: u32,
}

impl Default for PageLoadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
            max_idle_polls: 10,
        }
    }
}

/// How a page-load wait ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageLoadOutcome {
    Settled { elapsed_ms: u64, resources: usize },
    TimedOut { elapsed_ms: u64, pending: usize },
    /// A native dialog blocks script evaluation
    AlertPresent,
    /// The session died while polling
    Aborted { reason: String },
}

impl PageLoadOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, PageLoadOutcome::Settled { .. })
    }
}

#[derive(Debug, Default)]
struct ResourceTracker {
    settled: HashSet<String>,
    pending: usize,
}

impl ResourceTracker {
    /// Record one poll's entries, returning how many completed since the last poll
    fn update(&mut self, entries: &Value) -> usize {
        let Some(entries) = entries.as_array() else {
            return 0;
        };
        let mut newly_settled = 0;
        self.pending = 0;
        for entry in entries {
            let Some(url) = entry.get("url").and_then(Value::as_str) else {
                continue;
            };
            if !is_network_url(url) {
                continue;
            }
            let end = entry.get("end").and_then(Value::as_f64).unwrap_or(0.0);
            if end <= 0.0 {
                self.pending += 1;
                continue;
            }
            if self.settled.insert(format!("{url}@{end}")) {
                newly_settled += 1;
            }
        }
        newly_settled
    }
}

/// Only real network fetches count; data:, blob: and about: entries are ignored
fn is_network_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https" | "ftp" | "ftps") && url.host().is_some()
        }
        Err(_) => false,
    }
}

/// Block until the page's network activity settles or the timeout elapses
pub async fn wait_for_page_load(session: &dyn Session, config: &PageLoadConfig) -> PageLoadOutcome {
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut tracker = ResourceTracker::default();
    let mut idle_polls = 0;

    loop {
        match session.execute_script(PERFORMANCE_ENTRIES_JS, Vec::new()).await {
            Ok(entries) => {
                let new = tracker.update(&entries);
                if new > 0 {
                    debug!(
                        "{} resources completed, {} still pending",
                        new, tracker.pending
                    );
                    idle_polls = 0;
                } else {
                    idle_polls += 1;
                }
            }
            Err(SessionError::UnexpectedAlert(msg)) => {
                info!("Alert present, not waiting for page load: {}", msg);
                return PageLoadOutcome::AlertPresent;
            }
            Err(e) if e.is_connection() => {
                warn!("Session lost while waiting for page load: {}", e);
                return PageLoadOutcome::Aborted {
                    reason: e.to_string(),
                };
            }
            Err(e) => debug!("Transient error reading performance entries: {}", e),
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if idle_polls >= config.max_idle_polls {
            info!(
                "Page loaded, delayed {:.3}s",
                elapsed_ms as f64 / 1000.0
            );
            return PageLoadOutcome::Settled {
                elapsed_ms,
                resources: tracker.settled.len(),
            };
        }
        if Instant::now() >= deadline {
            warn!(
                "Page did not settle within {:?}; continuing anyway",
                config.timeout
            );
            return PageLoadOutcome::TimedOut {
                elapsed_ms,
                pending: tracker.pending,
            };
        }
        sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
#[path = "page_load_test.rs"]
mod page_load_test;
