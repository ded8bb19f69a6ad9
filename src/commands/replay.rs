use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use a11yprobe::activity::ReplayReport;
use a11yprobe::config::ProbeConfig;
use a11yprobe::types::OutputFormat;

use super::utils;

pub async fn handle_replay(
    config: &ProbeConfig,
    format: OutputFormat,
    file: PathBuf,
    activity: Option<String>,
) -> Result<()> {
    let activities = utils::load_activities(&file, activity.as_deref())?;
    info!("Replaying {} activities from {}", activities.len(), file.display());

    let replayer = utils::build_replayer(config)?;
    let mut session = utils::open_session(config).await?;

    let mut reports: Vec<ReplayReport> = Vec::with_capacity(activities.len());
    let mut failure = None;
    for activity in &activities {
        match replayer.replay(activity, &mut session).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    utils::close_session(session.as_ref()).await;

    match format {
        OutputFormat::Json => utils::print_json(&reports)?,
        OutputFormat::Simple => {
            for report in &reports {
                println!(
                    "{}: {} dispatched, {} skipped{}, page load {}",
                    report.activity,
                    report.dispatched.len(),
                    report.skipped.len(),
                    if report.restarted { ", restarted" } else { "" },
                    if report.page_load.is_settled() {
                        "settled"
                    } else {
                        "unsettled"
                    }
                );
            }
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
