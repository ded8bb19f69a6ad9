//! # a11yprobe
//!
//! Core of an accessibility-testing pipeline driven over WebDriver.
//!
//! The crate brings a web page into recorded states and finds the
//! interactive widgets on it:
//!
//! - [`activity`] loads recorded page descriptors into activities and replays
//!   them, retrying flaky interactions and restarting a dead session once.
//! - [`element`] gives DOM nodes an identity that survives navigation and
//!   re-rendering by rebinding through CSS paths.
//! - [`page_load`] waits for network activity to settle.
//! - [`click`] clicks an element and classifies the side effect (nothing,
//!   dialog, new tab, page change), undoing navigations.
//! - [`detect`] activates candidates, diffs DOM snapshots and classifies
//!   dropdowns, accordions, toggles and disclosures.
//!
//! Everything talks to the browser through the [`session::Session`] trait.
//! [`webdriver`] implements it with fantoccini.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Replay every activity of a descriptor file
//! a11yprobe replay pages.json
//!
//! # Detect widgets reached by one activity, probing clicks and hovers
//! a11yprobe detect pages.json --activity "Open menu" --method click --method hover
//!
//! # Click an element and see what happened
//! a11yprobe click "https://example.com" "button.submit"
//!
//! # Wait for a page to settle
//! a11yprobe wait-load "https://example.com" --browser chrome
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use a11yprobe::activity::{Activity, Replayer};
//! use a11yprobe::session::Session;
//! use a11yprobe::webdriver::{BrowserConfig, BrowserType};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = BrowserConfig::new(BrowserType::Firefox);
//! let mut session: Arc<dyn Session> = Arc::new(config.connect().await?);
//! let replayer = Replayer::new(Arc::new(config));
//!
//! let activity = Activity::new("Main Activity", "https://example.com", vec![]);
//! let report = replayer.replay(&activity, &mut session).await?;
//! println!("page settled: {}", report.page_load.is_settled());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

/// Recorded activities, loading and replay
pub mod activity;

/// Budgeted ancestor walks
pub mod ancestry;

/// Authentication collaborator
pub mod auth;

/// Click outcome classification
pub mod click;

/// Layered configuration
pub mod config;

/// DOM-diff widget detection
pub mod detect;

/// Element identity and rebinding
pub mod element;

/// CLI error type and exit codes
pub mod errors;

/// Retry wrapper for primitive interactions
pub mod interaction;

/// Network quiescence gate
pub mod page_load;

/// Request pacing
pub mod rate_limiter;

/// Browser session capability
pub mod session;

/// Shared value types
pub mod types;

/// Session capability over fantoccini
pub mod webdriver;

/// Automatic WebDriver process management
pub mod webdriver_manager;

#[cfg(test)]
mod test_support;

pub use activity::{Activity, Replayer};
pub use detect::{WidgetDetector, WidgetKind};
pub use element::ElementRef;
pub use session::{Session, SessionError, SessionFactory};
pub use types::{OutputFormat, ViewportSize};
pub use webdriver::{BrowserConfig, BrowserType};
