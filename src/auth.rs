//! Authentication collaborator.
//!
//! An activity's `open` step logs in once per session when its options ask
//! for it. The login flows themselves live outside this crate; this module
//! only parses the options blob and defines the [`Authenticator`] seam.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::session::{Session, SessionError};

/// Login flow named in the options blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// Credentials typed into an in-page modal
    Modal,
    /// A dedicated login page
    Page,
    /// HTTP basic auth prompt
    Alert,
}

/// Authentication settings attached to a page descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthOptions {
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    /// Flow-specific settings, passed through untouched
    #[serde(default)]
    pub auth_setting: Value,
}

impl AuthOptions {
    /// Parse options given either as a JSON object or as a JSON-encoded string
    ///
    /// `null` and the empty string mean "no options".
    pub fn from_value(value: &Value) -> Result<Option<Self>, serde_json::Error> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => {
                let inner: Value = serde_json::from_str(s)?;
                Self::from_value(&inner)
            }
            other => Ok(Some(serde_json::from_value(other.clone())?)),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.auth_required && self.auth_type.is_some()
    }
}

/// Serde adapter for fields holding [`AuthOptions`] as an object or a string
pub fn deserialize_options<'de, D>(deserializer: D) -> Result<Option<AuthOptions>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    AuthOptions::from_value(&value).map_err(serde::de::Error::custom)
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no login flow available for auth type {0:?}")]
    Unsupported(AuthType),
    #[error("login failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Performs a login flow against a live session
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, session: &dyn Session, options: &AuthOptions)
    -> Result<(), AuthError>;
}

/// Authenticator for runs without login support
///
/// Pages that need no login pass; pages that do are reported as unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthenticator;

#[async_trait]
impl Authenticator for NoAuthenticator {
    async fn authenticate(
        &self,
        _session: &dyn Session,
        options: &AuthOptions,
    ) -> Result<(), AuthError> {
        match options.auth_type {
            Some(auth_type) if options.auth_required => {
                warn!("Page requires {:?} login but no authenticator is configured", auth_type);
                Err(AuthError::Unsupported(auth_type))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;
