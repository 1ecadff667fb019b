//! Connection contract shared by local and remote hosts

use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::ExecutionResult;

/// Command that prints the numeric uid of the session user
pub const IDENTITY_PROBE: &str = "id -u";

/// A host that commands can be run on and files copied to
///
/// Implemented by [`LocalConnection`](crate::local::LocalConnection) and
/// [`RemoteConnection`](crate::remote::RemoteConnection).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a shell command
    ///
    /// A non-zero exit is reported through the result, not as an error.
    /// Unless `hide` is set, output is echoed as it is produced.
    async fn run(&self, command: &str, hide: bool) -> Result<ExecutionResult, ExecError>;

    /// Copy a local file to the session user's home directory
    ///
    /// Returns the transfer's exit status.
    async fn put(&self, source: &Path, hide: bool) -> Result<i32, ExecError>;

    /// Whether privileged commands must go through sudo
    fn needs_elevation(&self) -> bool;

    /// Session user
    fn user(&self) -> &str;

    /// Hostname
    fn host(&self) -> &str;

    /// Port, if the connection has one
    fn port(&self) -> Option<u16> {
        None
    }

    /// Release any resources held by the connection
    ///
    /// Safe to call more than once.
    fn close(&mut self) {}
}

/// Interpret the identity probe's output
pub(crate) fn probe_needs_elevation(result: &ExecutionResult) -> bool {
    result.stdout.trim() != "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_needs_elevation() {
        assert!(!probe_needs_elevation(&ExecutionResult::new(IDENTITY_PROBE, 0, "0\n", "")));
        assert!(probe_needs_elevation(&ExecutionResult::new(IDENTITY_PROBE, 0, "1000\n", "")));
        assert!(probe_needs_elevation(&ExecutionResult::new(IDENTITY_PROBE, 127, "", "")));
    }
}
