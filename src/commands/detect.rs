use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use a11yprobe::click::ClickClassifier;
use a11yprobe::config::ProbeConfig;
use a11yprobe::detect::locator::{candidates_from_selectors, find_candidates};
use a11yprobe::detect::{ActivationMethod, Detection, DetectionContext, WidgetDetector, WidgetKind};
use a11yprobe::errors::ProbeError;
use a11yprobe::types::OutputFormat;

use super::utils;

/// Detection results for one activity
#[derive(Debug, Serialize)]
struct ActivityDetections {
    activity: String,
    url: String,
    candidates: usize,
    resets: usize,
    excluded: Vec<String>,
    detections: Vec<Detection>,
}

pub async fn handle_detect(
    config: &ProbeConfig,
    format: OutputFormat,
    file: PathBuf,
    activity: Option<String>,
    selectors: Vec<String>,
    mut methods: Vec<ActivationMethod>,
) -> Result<()> {
    let activities = utils::load_activities(&file, activity.as_deref())?;
    if methods.is_empty() {
        methods.push(ActivationMethod::Click);
    }

    let replayer = utils::build_replayer(config)?;
    let classifier = ClickClassifier::new(
        replayer.limiter(),
        config.retry_policy(),
        config.click_settle(),
    );
    let detector = WidgetDetector::new(&replayer)
        .with_classifier(classifier)
        .with_timing(config.detect_timing())
        .with_max_dropdown_items(config.detect.max_dropdown_items)
        .with_ancestor_walk(config.ancestor_walk());
    let mut session = utils::open_session(config).await?;

    let mut results = Vec::with_capacity(activities.len());
    let mut failure: Option<ProbeError> = None;
    for activity in &activities {
        if let Err(e) = replayer.replay(activity, &mut session).await {
            failure = Some(e.into());
            break;
        }
        let located = if selectors.is_empty() {
            find_candidates(session.as_ref()).await
        } else {
            candidates_from_selectors(session.as_ref(), &selectors).await
        };
        let candidates = match located {
            Ok(candidates) => candidates,
            Err(e) => {
                failure = Some(e.into());
                break;
            }
        };
        info!(
            "Activity '{}': probing {} candidates",
            activity.name,
            candidates.len()
        );

        let mut ctx = DetectionContext::new(activity);
        let outcome = detector
            .detect_all(&mut ctx, &mut session, &candidates, &methods)
            .await;
        results.push(ActivityDetections {
            activity: activity.name.clone(),
            url: activity.url.clone(),
            candidates: candidates.len(),
            resets: ctx.resets,
            excluded: ctx.excluded,
            detections: ctx.detections,
        });
        if let Err(e) = outcome {
            failure = Some(e.into());
            break;
        }
    }
    utils::close_session(session.as_ref()).await;

    match format {
        OutputFormat::Json => utils::print_json(&results)?,
        OutputFormat::Simple => {
            for result in &results {
                println!("{} ({})", result.activity, result.url);
                for detection in &result.detections {
                    if matches!(detection.kind, WidgetKind::NotAWidget) {
                        continue;
                    }
                    println!(
                        "  {} [{:?}] {:?}",
                        detection.selector, detection.method, detection.kind
                    );
                }
                if !result.excluded.is_empty() {
                    println!("  lost while probing: {}", result.excluded.join(", "));
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
