use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use a11yprobe::activity::loader::load_file;
use a11yprobe::activity::{Activity, Replayer};
use a11yprobe::config::ProbeConfig;
use a11yprobe::errors::ProbeError;
use a11yprobe::session::{Session, SessionFactory};

/// Replayer wired from configuration, with a live-browser session factory
pub fn build_replayer(config: &ProbeConfig) -> Result<Replayer> {
    let factory: Arc<dyn SessionFactory> = Arc::new(config.browser_config()?);
    Ok(Replayer::new(factory)
        .with_limiter(config.limiter())
        .with_retry(config.retry_policy())
        .with_timing(config.replay_timing())
        .with_page_load(config.page_load_config()))
}

/// Open a browser session for `config`
pub async fn open_session(config: &ProbeConfig) -> Result<Arc<dyn Session>> {
    let factory = config.browser_config()?;
    let session = factory.create().await.map_err(ProbeError::from)?;
    Ok(session)
}

/// Quit a session, logging instead of failing
pub async fn close_session(session: &dyn Session) {
    if let Err(e) = session.quit().await {
        debug!("Closing session {} failed: {}", session.id(), e);
    }
}

/// Activities from a descriptor file, optionally narrowed to one name
pub fn load_activities(path: &Path, name: Option<&str>) -> Result<Vec<Activity>> {
    let activities =
        load_file(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let Some(name) = name else {
        return Ok(activities);
    };
    let selected: Vec<Activity> = activities.into_iter().filter(|a| a.name == name).collect();
    if selected.is_empty() {
        anyhow::bail!("No activity named '{}' in {}", name, path.display());
    }
    Ok(selected)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
