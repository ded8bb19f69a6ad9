//! Layered configuration.
//!
//! Values are resolved from built-in defaults, then a JSON file, then
//! `A11YPROBE_*` environment variables, then command-line flags. Every field
//! is optional in the file; missing sections keep their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::activity::ReplayTiming;
use crate::ancestry::{AncestorWalk, DEFAULT_MAX_DEPTH};
use crate::detect::{DetectTiming, MAX_DROPDOWN_ITEMS};
use crate::interaction::RetryPolicy;
use crate::page_load::PageLoadConfig;
use crate::rate_limiter::{RateLimit, RequestLimiter};
use crate::types::ViewportSize;
use crate::webdriver::{BrowserConfig, BrowserType};

const CONFIG_DIR_NAME: &str = ".a11yprobe";
const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_BROWSER: &str = "A11YPROBE_BROWSER";
pub const ENV_WEBDRIVER_URL: &str = "A11YPROBE_WEBDRIVER_URL";
pub const ENV_HEADLESS: &str = "A11YPROBE_HEADLESS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub browser: BrowserSection,
    pub page_load: PageLoadSection,
    pub retry: RetrySection,
    pub timing: TimingSection,
    pub rate_limit: RateLimitSection,
    pub detect: DetectSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    #[serde(rename = "type")]
    pub browser: BrowserType,
    pub headless: bool,
    /// `WIDTHxHEIGHT`
    pub viewport: Option<String>,
    /// Connect here instead of discovering or starting a driver
    pub webdriver_url: Option<String>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            browser: BrowserType::Firefox,
            headless: true,
            viewport: None,
            webdriver_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLoadSection {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_idle_polls: u32,
}

impl Default for PageLoadSection {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            poll_interval_ms: 500,
            max_idle_polls: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 7,
            initial_delay_ms: 1_000,
            backoff: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub element_wait_ms: u64,
    /// Pause after scrolling a replay target into view
    pub scroll_settle_ms: u64,
    pub post_action_ms: u64,
    /// How long the click classifier waits for a side effect to show
    pub click_settle_ms: u64,
    /// Pause after scrolling a detection candidate into view
    pub probe_scroll_settle_ms: u64,
    pub reveal_settle_ms: u64,
    pub hover_settle_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            element_wait_ms: 10_000,
            scroll_settle_ms: 4_000,
            post_action_ms: 1_000,
            click_settle_ms: 500,
            probe_scroll_settle_ms: 500,
            reveal_settle_ms: 1_000,
            hover_settle_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Minimum spacing between requests; 0 disables limiting
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectSection {
    /// Revealed items clicked while refining a dropdown
    pub max_dropdown_items: usize,
    /// Levels climbed when looking for a list container
    pub max_ancestor_depth: usize,
}

impl Default for DetectSection {
    fn default() -> Self {
        Self {
            max_dropdown_items: MAX_DROPDOWN_ITEMS,
            max_ancestor_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Values given on the command line; `None` keeps the configured value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub browser: Option<BrowserType>,
    pub headless: Option<bool>,
    pub viewport: Option<ViewportSize>,
    pub webdriver_url: Option<String>,
}

/// `~/.a11yprobe/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl ProbeConfig {
    /// Read a config file; the file must exist
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config JSON at: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the file layer
    ///
    /// An explicit path must exist. The default location is optional and
    /// yields defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!("No config at {}; using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Full resolution for the binary: file, process environment, flags
    pub fn resolve(explicit: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = Self::load(explicit)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Apply the environment layer through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(browser) = lookup(ENV_BROWSER) {
            self.browser.browser = browser
                .parse()
                .with_context(|| format!("Invalid {ENV_BROWSER}"))?;
        }
        if let Some(url) = lookup(ENV_WEBDRIVER_URL).filter(|u| !u.is_empty()) {
            self.browser.webdriver_url = Some(url);
        }
        if let Some(headless) = lookup(ENV_HEADLESS) {
            self.browser.headless = parse_flag(&headless)
                .with_context(|| format!("Invalid {ENV_HEADLESS}: {headless}"))?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(browser) = overrides.browser {
            self.browser.browser = browser;
        }
        if let Some(headless) = overrides.headless {
            self.browser.headless = headless;
        }
        if let Some(viewport) = overrides.viewport {
            self.browser.viewport = Some(viewport.to_string());
        }
        if let Some(url) = &overrides.webdriver_url {
            self.browser.webdriver_url = Some(url.clone());
        }
    }

    pub fn viewport(&self) -> Result<Option<ViewportSize>> {
        self.browser
            .viewport
            .as_deref()
            .map(ViewportSize::parse)
            .transpose()
    }

    pub fn browser_config(&self) -> Result<BrowserConfig> {
        Ok(BrowserConfig {
            browser: self.browser.browser,
            headless: self.browser.headless,
            viewport: self.viewport()?,
            webdriver_url: self.browser.webdriver_url.clone(),
        })
    }

    pub fn page_load_config(&self) -> PageLoadConfig {
        PageLoadConfig {
            timeout: Duration::from_millis(self.page_load.timeout_ms),
            poll_interval: Duration::from_millis(self.page_load.poll_interval_ms),
            max_idle_polls: self.page_load.max_idle_polls,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts.max(1),
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff: self.retry.backoff.max(1),
        }
    }

    pub fn replay_timing(&self) -> ReplayTiming {
        ReplayTiming {
            element_wait: Duration::from_millis(self.timing.element_wait_ms),
            scroll_settle: Duration::from_millis(self.timing.scroll_settle_ms),
            post_action: Duration::from_millis(self.timing.post_action_ms),
        }
    }

    pub fn detect_timing(&self) -> DetectTiming {
        DetectTiming {
            scroll_settle: Duration::from_millis(self.timing.probe_scroll_settle_ms),
            reveal_settle: Duration::from_millis(self.timing.reveal_settle_ms),
            hover_settle: Duration::from_millis(self.timing.hover_settle_ms),
        }
    }

    pub fn ancestor_walk(&self) -> AncestorWalk {
        AncestorWalk::new(self.detect.max_ancestor_depth.max(1))
    }

    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.timing.click_settle_ms)
    }

    pub fn limiter(&self) -> Arc<dyn RateLimit> {
        Arc::new(RequestLimiter::new(Duration::from_millis(
            self.rate_limit.interval_ms,
        )))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
