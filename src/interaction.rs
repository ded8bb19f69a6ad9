//! Bounded retry with exponential backoff for primitive interactions.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::session::{SessionError, SessionResult};

/// Retry schedule for clicks and keystrokes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 7,
            initial_delay: Duration::from_secs(1),
            backoff: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::ZERO,
            backoff: 1,
        }
    }
}

/// Which primitive is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Click,
    SendKeys,
    Hover,
}

impl InteractionKind {
    pub fn is_retryable(self, error: &SessionError) -> bool {
        match error {
            SessionError::NotInteractable(_) | SessionError::StaleElement(_) => true,
            SessionError::ClickIntercepted(_) => self == InteractionKind::Click,
            _ => false,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts
///
/// The closure is called afresh on every attempt so it can re-resolve its element.
pub async fn retry_interaction<T, F, Fut>(
    policy: &RetryPolicy,
    kind: InteractionKind,
    mut op: F,
) -> SessionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionResult<T>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && kind.is_retryable(&e) => {
                debug!(
                    "{:?} attempt {}/{} failed: {}; retrying in {:?}",
                    kind, attempt, policy.attempts, e, delay
                );
                sleep(delay).await;
                delay *= policy.backoff;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "interaction_test.rs"]
mod interaction_test;
