use std::fmt;

use crate::activity::ReplayError;
use crate::activity::loader::LoadError;
use crate::detect::DetectError;
use crate::session::SessionError;

/// CLI-level error carrying a stable exit code
#[derive(Debug)]
pub enum ProbeError {
    /// Element not found or lost (exit code 2)
    ElementNotFound(String),
    /// A recorded command failed or was not understood (exit code 3)
    CommandFailed { index: usize, message: String },
    /// WebDriver connection failed or the session died (exit code 4)
    WebDriverFailed(String),
    /// Operation timeout (exit code 5)
    Timeout(String),
    /// Generic error (exit code 1)
    Other(anyhow::Error),
}

impl ProbeError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeError::ElementNotFound(_) => 2,
            ProbeError::CommandFailed { .. } => 3,
            ProbeError::WebDriverFailed(_) => 4,
            ProbeError::Timeout(_) => 5,
            ProbeError::Other(_) => 1,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::ElementNotFound(msg) => write!(f, "Element not found: {}", msg),
            ProbeError::CommandFailed { message, .. } => write!(f, "{}", message),
            ProbeError::WebDriverFailed(msg) => {
                write!(f, "WebDriver connection failed: {}", msg)
            }
            ProbeError::Timeout(msg) => write!(f, "Operation timed out: {}", msg),
            ProbeError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<SessionError> for ProbeError {
    fn from(err: SessionError) -> Self {
        match err {
            e if e.is_connection() => ProbeError::WebDriverFailed(e.to_string()),
            e if e.is_lost() => ProbeError::ElementNotFound(e.to_string()),
            SessionError::Timeout(msg) => ProbeError::Timeout(msg),
            e => ProbeError::Other(e.into()),
        }
    }
}

impl From<ReplayError> for ProbeError {
    fn from(err: ReplayError) -> Self {
        match err {
            ReplayError::Connection(e) => e.into(),
            ReplayError::IllegalArgument { index, .. } => ProbeError::CommandFailed {
                index,
                message: err.to_string(),
            },
            ReplayError::CommandFailed { index, .. } => ProbeError::CommandFailed {
                index,
                message: err.to_string(),
            },
        }
    }
}

impl From<DetectError> for ProbeError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::Replay(e) => e.into(),
            DetectError::Session(e) => e.into(),
        }
    }
}

impl From<anyhow::Error> for ProbeError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<ProbeError>() {
            Ok(probe) => return probe,
            Err(err) => err,
        };
        let err = match err.downcast::<ReplayError>() {
            Ok(replay) => return replay.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<DetectError>() {
            Ok(detect) => return detect.into(),
            Err(err) => err,
        };
        let err = match err.downcast::<SessionError>() {
            Ok(session) => return session.into(),
            Err(err) => err,
        };
        if err.downcast_ref::<LoadError>().is_some() {
            return ProbeError::Other(err);
        }

        // Errors raised while starting drivers only carry a message
        let msg = err.to_string();
        if msg.contains("Failed to connect to WebDriver")
            || msg.contains("geckodriver")
            || msg.contains("chromedriver")
        {
            ProbeError::WebDriverFailed(msg)
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ProbeError::Timeout(msg)
        } else {
            ProbeError::Other(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let lost: ProbeError = SessionError::ElementLost("html > body > a".into()).into();
        assert_eq!(lost.exit_code(), 2);

        let failed = ReplayError::IllegalArgument {
            index: 3,
            command: "dragAndDrop".into(),
        };
        let failed: ProbeError = anyhow::Error::new(failed).into();
        assert_eq!(failed.exit_code(), 3);
        assert_eq!(failed.to_string(), "Command dragAndDrop not found (position 3).");

        let dead: ProbeError =
            ReplayError::Connection(SessionError::InvalidSession("gone".into())).into();
        assert_eq!(dead.exit_code(), 4);

        let slow: ProbeError = anyhow::anyhow!("page load timed out").into();
        assert_eq!(slow.exit_code(), 5);

        let driver: ProbeError = anyhow::anyhow!("Failed to connect to WebDriver at 4444").into();
        assert_eq!(driver.exit_code(), 4);

        let other: ProbeError = anyhow::anyhow!("bad input").into();
        assert_eq!(other.exit_code(), 1);
    }
}
