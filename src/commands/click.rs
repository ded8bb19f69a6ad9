use anyhow::Result;
use serde_json::json;
use tracing::info;

use a11yprobe::activity::Activity;
use a11yprobe::click::{ClickClassifier, ClickOutcome};
use a11yprobe::config::ProbeConfig;
use a11yprobe::element::ElementRef;
use a11yprobe::errors::ProbeError;
use a11yprobe::session::{Locator, Session};
use a11yprobe::types::OutputFormat;

use super::utils;

/// Open `url`, click the first match of `selector` and report what happened
pub async fn handle_click(
    config: &ProbeConfig,
    format: OutputFormat,
    url: String,
    selector: String,
) -> Result<()> {
    info!("Clicking {} on {}", selector, url);

    let replayer = utils::build_replayer(config)?;
    let classifier = ClickClassifier::new(
        replayer.limiter(),
        config.retry_policy(),
        config.click_settle(),
    );
    let activity = Activity::new("click", url.as_str(), Vec::new());
    let mut session = utils::open_session(config).await?;

    let result = async {
        replayer.replay(&activity, &mut session).await?;
        click_selector(session.as_ref(), &classifier, &selector).await
    }
    .await;
    utils::close_session(session.as_ref()).await;
    let outcome = result?;

    match format {
        OutputFormat::Json => utils::print_json(&json!({
            "url": url,
            "selector": selector,
            "outcome": outcome,
        }))?,
        OutputFormat::Simple => match &outcome {
            ClickOutcome::None => println!("Clicked {}: no navigation", selector),
            ClickOutcome::Alert => println!("Clicked {}: dialog dismissed", selector),
            ClickOutcome::NewTab { url } => println!("Clicked {}: opened {}", selector, url),
            ClickOutcome::PageChange { url } => {
                println!("Clicked {}: navigated to {}", selector, url)
            }
            ClickOutcome::NonInteractable => println!("{} is not interactable", selector),
            ClickOutcome::Lost => println!("{} disappeared before the click", selector),
        },
    }
    Ok(())
}

async fn click_selector(
    session: &dyn Session,
    classifier: &ClickClassifier,
    selector: &str,
) -> Result<ClickOutcome> {
    let handle = session
        .find(&Locator::css(selector))
        .await
        .map_err(ProbeError::from)?
        .ok_or_else(|| ProbeError::ElementNotFound(selector.to_string()))?;
    let element = ElementRef::from_handle(session, handle)
        .await
        .map_err(ProbeError::from)?;
    let outcome = classifier
        .click(&element, session)
        .await
        .map_err(ProbeError::from)?;
    Ok(outcome)
}
