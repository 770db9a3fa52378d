//! Error types surfaced by the monitor to its caller
//!
//! Only configuration and startup failures ever reach the caller. Sensor and
//! publish failures during a cycle are recovered inside the loop.

use crate::monitor::MonitorState;
use thiserror::Error;

/// Boxed cause carried by startup failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures returned by [`Monitor::start`](crate::monitor::Monitor::start)
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A mandatory option was absent; the broker was never contacted
    #[error("Required option '{key}' is missing")]
    MissingOption { key: &'static str },

    /// The single connect attempt failed or timed out
    #[error("Failure starting monitor: broker connection failed, root cause: {source}")]
    ConnectFailed {
        #[source]
        source: BoxError,
    },

    /// `start()` was called on a monitor that has already run
    #[error("Failure starting monitor: monitor is {state}, a fresh instance is required")]
    AlreadyStarted { state: MonitorState },
}

impl MonitorError {
    pub fn missing_option(key: &'static str) -> Self {
        Self::MissingOption { key }
    }

    pub fn connect_failed<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ConnectFailed {
            source: source.into(),
        }
    }

    /// True for errors the operator fixes by changing configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::MissingOption { .. })
    }

    /// True when the broker could not be reached at startup
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
    }
}

/// Result type for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_missing_option_message() {
        let error = MonitorError::missing_option("thingName");
        assert_eq!(error.to_string(), "Required option 'thingName' is missing");
        assert!(error.is_configuration_error());
        assert!(!error.is_connection_error());
    }

    #[test]
    fn test_connect_failed_wraps_cause() {
        let error = MonitorError::connect_failed("connection refused");

        assert_eq!(
            error.to_string(),
            "Failure starting monitor: broker connection failed, root cause: connection refused"
        );
        assert!(error.is_connection_error());
        assert_eq!(
            error.source().map(|s| s.to_string()),
            Some("connection refused".to_string())
        );
    }

    #[test]
    fn test_connection_and_configuration_errors_are_distinguishable() {
        let config = MonitorError::missing_option("topicName").to_string();
        let connect = MonitorError::connect_failed("host unreachable").to_string();

        assert!(!config.contains("Failure starting monitor"));
        assert!(connect.contains("Failure starting monitor"));
    }

    #[test]
    fn test_already_started_names_state() {
        let error = MonitorError::AlreadyStarted {
            state: MonitorState::Stopped,
        };
        assert!(error.to_string().contains("stopped"));
    }
}
