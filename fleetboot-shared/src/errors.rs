//! Error types for the fleetboot agent and its shared components.

use thiserror::Error;

/// All errors produced by fleetboot components.
#[derive(Debug, Error)]
pub enum FleetbootError {
    /// Missing or invalid fields in the runner configuration. Fatal to
    /// the run before the worker starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// The run state did not pass post-configuration validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The fleet manager rejected or failed the register operation.
    /// Fatal: without credentials no progress is possible.
    #[error("registration failed: {0}")]
    Registration(String),

    /// A provider failed to configure the run.
    #[error("provider error: {0}")]
    Provider(String),

    /// A platform metadata-service query failed. Per-call, not global.
    #[error("metadata service error: {0}")]
    Metadata(String),

    /// The capability channel to the worker failed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The worker process could not be started or waited on.
    #[error("worker error: {0}")]
    Worker(String),

    /// The instance self-shutdown action failed.
    #[error("shutdown failed: {0}")]
    Shutdown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type used throughout fleetboot.
pub type FleetbootResult<T> = Result<T, FleetbootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = FleetbootError::Config("provider block missing".into());
        assert_eq!(err.to_string(), "configuration error: provider block missing");
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> FleetbootResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(FleetbootError::Io(_))));
    }
}
