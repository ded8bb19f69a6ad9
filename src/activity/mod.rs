//! Recorded activities and their replay.
//!
//! An [`Activity`] is a named command script that brings a page into one
//! state. The [`Replayer`] opens the page, dispatches every command that the
//! ignored-command filter lets through and finally waits for the page to
//! settle. A dead browser session triggers exactly one full restart with a
//! fresh session from the [`SessionFactory`].

pub mod dispatch;
pub mod keys;
pub mod loader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthError, AuthOptions, Authenticator, NoAuthenticator};
use crate::interaction::RetryPolicy;
use crate::page_load::{PageLoadConfig, PageLoadOutcome, wait_for_page_load};
use crate::rate_limiter::{RateLimit, RequestLimiter};
use crate::session::{Session, SessionError, SessionFactory, SessionResult};
use crate::types::ViewportSize;

use self::dispatch::ReplayRun;

/// One recorded step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub target: String,
    /// Fallback locators, tried in order after `target`
    #[serde(default, deserialize_with = "deserialize_targets")]
    pub targets: Vec<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub opens_window: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_handle_name: Option<String>,
}

impl Command {
    pub fn new(command: &str, target: &str, value: &str) -> Self {
        Command {
            command: command.to_string(),
            target: target.to_string(),
            value: value.to_string(),
            ..Default::default()
        }
    }

    /// Synthetic click on a CSS selector
    pub fn click_css(selector: &str) -> Self {
        Self::new("click", &format!("css={selector}"), "")
    }
}

/// Recorders store fallback targets either as strings or as `[locator, kind]` pairs
fn deserialize_targets<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s),
            Value::Array(pair) => pair.into_iter().next().and_then(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            }),
            _ => None,
        })
        .collect())
}

/// A named script reaching one page state
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub name: String,
    pub url: String,
    pub options: Option<AuthOptions>,
    /// The page is reached by logging in, so `open` does not navigate
    pub page_after_login: bool,
    pub page_resolution: Option<ViewportSize>,
    pub commands: Vec<Command>,
}

impl Activity {
    pub fn new(name: impl Into<String>, url: impl Into<String>, commands: Vec<Command>) -> Self {
        Activity {
            name: name.into(),
            url: url.into(),
            options: None,
            page_after_login: false,
            page_resolution: None,
            commands,
        }
    }

    /// Recorder artifacts and steps handled by the open step are never dispatched
    pub fn ignore_command(&self, index: usize) -> bool {
        let Some(command) = self.commands.get(index) else {
            return false;
        };
        let name_at = |i: usize| self.commands.get(i).map(|c| c.command.as_str());
        match command.command.as_str() {
            "mouseOver" => name_at(index + 1) == Some("mouseOut"),
            "mouseOut" => index > 0 && name_at(index - 1) == Some("mouseOver"),
            "close" => index + 1 == self.commands.len(),
            "open" => index == 0,
            "setWindowSize" => true,
            _ => false,
        }
    }

    /// Resolve an `open` target against the activity URL; empty means the activity URL
    pub fn resolve_url(&self, target: &str) -> String {
        if target.is_empty() {
            return self.url.clone();
        }
        match Url::parse(&self.url).and_then(|base| base.join(target)) {
            Ok(url) => url.to_string(),
            Err(_) => target.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    /// Script-authoring bug; never retried
    #[error("Command {command} not found (position {index}).")]
    IllegalArgument { index: usize, command: String },
    #[error("The command {raw} at position {index} is incorrect: {message}")]
    CommandFailed {
        index: usize,
        raw: String,
        message: String,
    },
    #[error("Connection error: {0}")]
    Connection(SessionError),
}

impl ReplayError {
    pub fn command_failed(index: usize, command: &Command, message: impl Into<String>) -> Self {
        ReplayError::CommandFailed {
            index,
            raw: serde_json::to_string(command).unwrap_or_else(|_| command.command.clone()),
            message: message.into(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ReplayError::Connection(_))
    }
}

/// Replay state machine positions, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Opening,
    Replaying(usize),
    Restarting,
    Done,
}

/// What one replay did
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub activity: String,
    pub url: String,
    pub dispatched: Vec<usize>,
    pub skipped: Vec<usize>,
    pub restarted: bool,
    /// Names under which the script stored window handles
    pub stored_windows: Vec<String>,
    pub page_load: PageLoadOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Fixed delays used while replaying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTiming {
    /// Explicit wait for a target to become visible
    pub element_wait: Duration,
    /// Pause after scrolling a target into view
    pub scroll_settle: Duration,
    /// Pause after each input action
    pub post_action: Duration,
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            element_wait: Duration::from_secs(10),
            scroll_settle: Duration::from_secs(4),
            post_action: Duration::from_secs(1),
        }
    }
}

/// Replays activities against a session, restarting it once on connection loss
pub struct Replayer {
    factory: Arc<dyn SessionFactory>,
    limiter: Arc<dyn RateLimit>,
    authenticator: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    timing: ReplayTiming,
    page_load: PageLoadConfig,
    /// Session ids that already went through a login flow
    authenticated: Mutex<HashSet<String>>,
}

impl Replayer {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Replayer {
            factory,
            limiter: Arc::new(RequestLimiter::unlimited()),
            authenticator: Arc::new(NoAuthenticator),
            retry: RetryPolicy::default(),
            timing: ReplayTiming::default(),
            page_load: PageLoadConfig::default(),
            authenticated: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timing(mut self, timing: ReplayTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_page_load(mut self, page_load: PageLoadConfig) -> Self {
        self.page_load = page_load;
        self
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timing(&self) -> &ReplayTiming {
        &self.timing
    }

    pub fn limiter(&self) -> Arc<dyn RateLimit> {
        self.limiter.clone()
    }

    /// Replay `activity`, replacing `session` with a fresh one if it dies
    ///
    /// A second connection failure during the restarted replay is returned.
    pub async fn replay(
        &self,
        activity: &Activity,
        session: &mut Arc<dyn Session>,
    ) -> Result<ReplayReport, ReplayError> {
        let started_at = Utc::now();
        let first = self.replay_once(activity, session.as_ref()).await;
        let (run, restarted) = match first {
            Err(ReplayError::Connection(e)) => {
                warn!(
                    "{:?}: activity '{}' lost its session: {}",
                    ReplayState::Restarting,
                    activity.name,
                    e
                );
                if let Err(e) = session.quit().await {
                    debug!("Quitting dead session failed: {}", e);
                }
                *session = self
                    .factory
                    .create()
                    .await
                    .map_err(ReplayError::Connection)?;
                (self.replay_once(activity, session.as_ref()).await?, true)
            }
            other => (other?, false),
        };

        Ok(ReplayReport {
            activity: activity.name.clone(),
            url: activity.url.clone(),
            dispatched: run.dispatched,
            skipped: run.skipped,
            restarted,
            stored_windows: run.stored_windows,
            page_load: run.page_load,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn replay_once(
        &self,
        activity: &Activity,
        session: &dyn Session,
    ) -> Result<RunSummary, ReplayError> {
        info!("{:?}: activity '{}' at {}", ReplayState::Opening, activity.name, activity.url);
        if let Some(size) = activity.page_resolution
            && let Err(e) = session.set_window_size(size.width, size.height).await
        {
            if e.is_connection() {
                return Err(ReplayError::Connection(e));
            }
            warn!("Could not apply page resolution {}: {}", size, e);
        }
        let target = (!activity.page_after_login).then(|| activity.url.clone());
        self.open(session, activity, target.as_deref())
            .await
            .map_err(|e| open_failure(&activity.url, e))?;

        let mut run = ReplayRun::new(self, activity, session)
            .await
            .map_err(|e| open_failure(&activity.url, e))?;
        let mut dispatched = Vec::new();
        let mut skipped = Vec::new();
        for (index, command) in activity.commands.iter().enumerate() {
            if activity.ignore_command(index) {
                debug!("Skipping command {} ({})", index, command.command);
                skipped.push(index);
                continue;
            }
            debug!("{:?}: {}", ReplayState::Replaying(index), command.command);
            run.dispatch(index, command).await?;
            dispatched.push(index);
        }

        let mut stored_windows: Vec<String> = run.stored_windows().keys().cloned().collect();
        stored_windows.sort();
        let page_load = wait_for_page_load(session, &self.page_load).await;
        info!("{:?}: activity '{}'", ReplayState::Done, activity.name);
        Ok(RunSummary {
            dispatched,
            skipped,
            stored_windows,
            page_load,
        })
    }

    /// Open step: pace, log in once per session, then navigate to `url` if given
    pub(crate) async fn open(
        &self,
        session: &dyn Session,
        activity: &Activity,
        url: Option<&str>,
    ) -> SessionResult<()> {
        self.limiter.delay_access(true, 2).await;

        if let Some(options) = activity.options.as_ref().filter(|o| o.requires_auth()) {
            let already = self
                .authenticated
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(session.id());
            if !already {
                match self.authenticator.authenticate(session, options).await {
                    Ok(()) => {
                        info!("Authenticated session {}", session.id());
                        self.authenticated
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(session.id().to_string());
                    }
                    Err(AuthError::Session(e)) if e.is_connection() => return Err(e),
                    Err(e) => warn!("Authentication for '{}' failed: {}", activity.name, e),
                }
            }
        }

        if let Some(url) = url {
            session.navigate(url).await?;
        }
        Ok(())
    }
}

fn open_failure(url: &str, e: SessionError) -> ReplayError {
    if e.is_connection() {
        ReplayError::Connection(e)
    } else {
        ReplayError::command_failed(0, &Command::new("open", url, ""), e.to_string())
    }
}

struct RunSummary {
    dispatched: Vec<usize>,
    skipped: Vec<usize>,
    stored_windows: Vec<String>,
    page_load: PageLoadOutcome,
}
