//! Load activities from recorded page descriptors.
//!
//! A descriptor file holds a list of pages (bare, or wrapped in
//! `{"page_infos": [...]}`, or a single page object). Every page yields one
//! activity per recorded test, one per click list, or a single
//! `"Main Activity"` with no commands.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::{Activity, Command};
use crate::auth::{AuthOptions, deserialize_options};
use crate::types::ViewportSize;

pub const MAIN_ACTIVITY: &str = "Main Activity";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid page descriptors: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid page_resolution '{0}', expected WIDTHxHEIGHT")]
    Resolution(String),
    #[error("invalid side_file for activity '{name}': {message}")]
    SideFile { name: String, message: String },
}

/// One page entry of a descriptor file
#[derive(Debug, Clone, Deserialize)]
pub struct PageDescriptor {
    pub url: String,
    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: Option<AuthOptions>,
    #[serde(default)]
    pub page_after_login: bool,
    #[serde(default)]
    pub page_resolution: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityDescriptor {
    pub name: String,
    /// Recorded script, as an object or a JSON-encoded string
    #[serde(default)]
    pub side_file: Value,
    #[serde(default)]
    pub element_click_order: Option<Vec<Option<String>>>,
}

/// Recorded script with one command list per test
#[derive(Debug, Clone, Deserialize)]
pub struct SideFile {
    #[serde(default)]
    pub tests: Vec<SideTest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SideTest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub commands: Vec<Command>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PagesFile {
    List(Vec<PageDescriptor>),
    Wrapped { page_infos: Vec<PageDescriptor> },
    Single(Box<PageDescriptor>),
}

pub fn parse_pages(json: &str) -> Result<Vec<PageDescriptor>, LoadError> {
    Ok(match serde_json::from_str::<PagesFile>(json)? {
        PagesFile::List(pages) => pages,
        PagesFile::Wrapped { page_infos } => page_infos,
        PagesFile::Single(page) => vec![*page],
    })
}

pub fn load_pages(path: &Path) -> Result<Vec<PageDescriptor>, LoadError> {
    let json = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pages(&json)
}

impl ActivityDescriptor {
    fn side_file(&self) -> Result<Option<SideFile>, LoadError> {
        let invalid = |e: serde_json::Error| LoadError::SideFile {
            name: self.name.clone(),
            message: e.to_string(),
        };
        match &self.side_file {
            Value::Null | Value::Bool(false) => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => serde_json::from_str(s).map(Some).map_err(invalid),
            other => serde_json::from_value(other.clone())
                .map(Some)
                .map_err(invalid),
        }
    }

    /// Click commands for the non-empty selectors of `element_click_order`
    fn click_commands(&self) -> Vec<Command> {
        self.element_click_order
            .iter()
            .flatten()
            .flatten()
            .filter(|selector| !selector.trim().is_empty())
            .map(|selector| Command::click_css(selector))
            .collect()
    }
}

impl PageDescriptor {
    pub fn resolution(&self) -> Result<Option<ViewportSize>, LoadError> {
        match self.page_resolution.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => ViewportSize::parse(raw)
                .map(Some)
                .map_err(|_| LoadError::Resolution(raw.to_string())),
        }
    }

    fn activity(&self, name: &str, commands: Vec<Command>, resolution: Option<ViewportSize>) -> Activity {
        Activity {
            name: name.to_string(),
            url: self.url.clone(),
            options: self.options.clone(),
            page_after_login: self.page_after_login,
            page_resolution: resolution,
            commands,
        }
    }
}

/// Build the activities described by one page
pub fn load_activities(page: &PageDescriptor) -> Result<Vec<Activity>, LoadError> {
    let resolution = page.resolution()?;
    if page.activities.is_empty() {
        return Ok(vec![page.activity(MAIN_ACTIVITY, Vec::new(), resolution)]);
    }

    let mut activities = Vec::new();
    for descriptor in &page.activities {
        match descriptor.side_file()? {
            Some(side_file) => {
                debug!(
                    "Activity '{}' has {} recorded tests",
                    descriptor.name,
                    side_file.tests.len()
                );
                for test in side_file.tests {
                    activities.push(page.activity(&descriptor.name, test.commands, resolution));
                }
            }
            None => activities.push(page.activity(
                &descriptor.name,
                descriptor.click_commands(),
                resolution,
            )),
        }
    }
    Ok(activities)
}

/// Every activity of every page in a descriptor file
pub fn load_file(path: &Path) -> Result<Vec<Activity>, LoadError> {
    let mut activities = Vec::new();
    for page in load_pages(path)? {
        activities.extend(load_activities(&page)?);
    }
    Ok(activities)
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;
