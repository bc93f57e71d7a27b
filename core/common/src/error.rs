//! Common error types for syncwarden.

use thiserror::Error;

/// Top-level error type for syncwarden operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Startup configuration is invalid. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sync backend reported a failure (non-zero exit, bad output).
    #[error("Backend error: {0}")]
    Backend(String),

    /// An external call did not finish within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A value could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether retrying the same call later could succeed.
    ///
    /// Timeouts are treated exactly like any other transient failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Backend(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout("lsjson".to_string()).is_transient());
        assert!(Error::Backend("exit 1".to_string()).is_transient());
        assert!(!Error::Config("missing filter file".to_string()).is_transient());
        assert!(!Error::NotFound("a.txt".to_string()).is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<Vec<u8>>("not json").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
