use anyhow::Result;
use serde_json::json;
use tracing::info;

use a11yprobe::config::ProbeConfig;
use a11yprobe::errors::ProbeError;
use a11yprobe::page_load::{PageLoadOutcome, wait_for_page_load};
use a11yprobe::types::OutputFormat;

use super::utils;

/// Navigate to `url` and wait for network activity to settle
pub async fn handle_wait_load(config: &ProbeConfig, format: OutputFormat, url: String) -> Result<()> {
    let page_load = config.page_load_config();
    info!("Waiting for {} to settle (timeout {:?})", url, page_load.timeout);

    let session = utils::open_session(config).await?;
    let result = match session.navigate(&url).await {
        Ok(()) => Ok(wait_for_page_load(session.as_ref(), &page_load).await),
        Err(e) => Err(ProbeError::from(e)),
    };
    utils::close_session(session.as_ref()).await;
    let outcome = result?;

    match format {
        OutputFormat::Json => utils::print_json(&json!({ "url": url, "page_load": outcome }))?,
        OutputFormat::Simple => match &outcome {
            PageLoadOutcome::Settled {
                elapsed_ms,
                resources,
            } => println!("Settled after {}ms ({} resources)", elapsed_ms, resources),
            PageLoadOutcome::TimedOut {
                elapsed_ms,
                pending,
            } => println!(
                "Timeout reached after {}ms, {} resources still pending",
                elapsed_ms, pending
            ),
            PageLoadOutcome::AlertPresent => println!("A dialog is blocking the page"),
            PageLoadOutcome::Aborted { reason } => println!("Aborted: {}", reason),
        },
    }

    // The gate itself never fails; a dead session is still an error
    if let PageLoadOutcome::Aborted { reason } = outcome {
        return Err(ProbeError::WebDriverFailed(reason).into());
    }
    Ok(())
}
