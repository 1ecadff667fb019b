//! Error types for cf-remote-exec

use thiserror::Error;

/// Errors that can occur while connecting to or executing on a host
///
/// A command that runs and exits non-zero is not an error; it is reported
/// through [`ExecutionResult::return_code`](crate::result::ExecutionResult).
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Transport could not reach or authenticate against the host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Host address could not be parsed
    #[error("invalid host address '{0}'")]
    InvalidHost(String),

    /// Execution engine returned no result for the requested host
    #[error("no result returned for host {0}")]
    MissingResult(String),

    /// Every candidate user was rejected
    #[error("Could not ssh into '{host}'")]
    NoUsableUser {
        /// Host that could not be reached
        host: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Check if error came from the transport layer
    ///
    /// Connection search moves on to the next candidate user on these.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_) | ExecError::SpawnError(_) | ExecError::MissingResult(_)
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::IoError(e.to_string())
    }
}
