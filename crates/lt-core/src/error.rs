//! Error types for lt-core.
//!
//! The engine itself never surfaces fetch failures to consumers; these errors
//! travel between the feed source and the controllers (which log and retry)
//! and out of the configuration and client-construction edges.

use std::time::Duration;

/// Errors produced by lt-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The feed source rejected or failed a chunk fetch.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// A feed request did not complete in time.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Payload could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A wire timestamp could not be parsed.
    #[error("Invalid timestamp {value:?}: {reason}")]
    Timestamp {
        /// The offending wire value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Configuration is malformed or inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Runtime state error.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether a controller should treat this as a transient fetch failure.
    ///
    /// Transient failures are retried by the backfill walk; anything else
    /// ends the walk. Live polling keeps ticking in both cases.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::Timeout(_) | Self::Http(_) | Self::Json(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for lt-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_are_transient() {
        assert!(Error::Fetch("503".into()).is_transient());
        assert!(Error::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
        assert!(!Error::Runtime("closed".into()).is_transient());
    }

    #[test]
    fn timestamp_error_display_includes_value() {
        let err = Error::Timestamp {
            value: "nope".into(),
            reason: "input contains invalid characters".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"nope\""));
        assert!(msg.contains("invalid characters"));
    }

    #[test]
    fn toml_errors_map_to_config() {
        let err: Error = toml::from_str::<toml::Value>("= broken")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Config(_)));
    }
}
