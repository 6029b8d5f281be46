//! Error taxonomy for device kind resolution.
//!
//! Every failure surfaced by the resolver is a [`LoaderError`]. The type is
//! `Clone` because a single in-flight resolution hands the same outcome to
//! every caller waiting on it, so payloads are kept as strings.

use thiserror::Error;

/// Resolution and adapter errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoaderError {
    /// The remote registry could not be reached or answered with an error.
    #[error("Registry error: {0}")]
    Registry(String),

    /// The manifest text is malformed or failed validation.
    #[error("Failed to parse manifest for {kind}: {message}")]
    Parse { kind: String, message: String },

    /// Packaged or declarative code violates its declared capability contract.
    #[error("Implementation Error: {0}")]
    Implementation(String),

    /// A builtin kind has no registered implementation in this deployment.
    #[error("The device {0} is not supported in this instance")]
    Unsupported(String),

    /// A cached code bundle disagrees with the manifest package version.
    #[error("Cached package for {kind} is out of date (found {found:?}, want {wanted})")]
    VersionMismatch {
        kind: String,
        found: Option<i64>,
        wanted: i64,
    },

    /// The kind identifier cannot be used as a cache key.
    #[error("Invalid device kind: {0:?}")]
    InvalidKind(String),

    /// Subscribing to a query that cannot be monitored.
    #[error("Query {0} is non-deterministic and cannot be monitored")]
    NotMonitorable(String),

    /// The device has no query or action with this name.
    #[error("Device {kind} has no {function_type} named {name}")]
    UnknownFunction {
        kind: String,
        function_type: &'static str,
        name: String,
    },

    /// A device endpoint answered with a non-success status.
    #[error("Unexpected HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    /// Transport or decoding failure while talking to a device endpoint.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Filesystem failure other than a missing file.
    #[error("IO error: {0}")]
    Io(String),

    /// Error raised by packaged device code while running a query or action.
    #[error("Device error: {0}")]
    Device(String),
}

/// Result type used across the workspace.
pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    /// Build a parse error for the given kind.
    pub fn parse(kind: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            kind: kind.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Implementation and unsupported errors come from the code itself, so a
    /// retry would fetch the same broken code again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registry(_) | Self::Http { .. } | Self::Communication(_) | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => Self::Communication(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Communication(format!("JSON decode error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_error_display() {
        let err = LoaderError::Implementation("Implementation for action foo missing".into());
        assert_eq!(
            err.to_string(),
            "Implementation Error: Implementation for action foo missing"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(LoaderError::Registry("timeout".into()).is_retryable());
        assert!(!LoaderError::Implementation("x".into()).is_retryable());
        assert!(!LoaderError::Unsupported("org.example".into()).is_retryable());
    }

    #[test]
    fn test_io_conversion_keeps_message() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LoaderError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
