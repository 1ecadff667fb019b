//! Result types for command execution and file transfer

use serde::{Deserialize, Serialize};

/// Result of a completed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Command text as issued
    pub command: String,
    /// Exit status code (0 for success)
    pub return_code: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
}

impl ExecutionResult {
    /// Create a new result
    pub fn new(
        command: impl Into<String>,
        return_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            return_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Result of a single file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Local source path
    pub source: String,
    /// Destination path on the host
    pub destination: String,
    /// Exit status of the transfer program
    pub return_code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_tracks_return_code() {
        assert!(ExecutionResult::new("true", 0, "", "").success());
        assert!(!ExecutionResult::new("false", 1, "", "").success());
    }
}
