//! Execution engine: runs commands and transfers files on sets of hosts
//!
//! [`OpenSshEngine`] drives the system `ssh`/`scp` clients, one process per
//! host, concurrently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::config::TransportConfig;
use crate::error::ExecError;
use crate::result::{ExecutionResult, TransferResult};
use crate::stream::{Echo, capture};

/// Exit status ssh uses for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Line prefixes of the diagnostics the ssh client itself prints on stderr
const SSH_CLIENT_DIAGNOSTICS: &[&str] = &[
    "ssh:",
    "Host key verification failed",
    "kex_exchange_identification:",
    "ssh_exchange_identification:",
    "Connection closed by",
    "Connection reset by",
    "Connection timed out",
    "Connection to ",
    "Received disconnect from",
    "Too many authentication failures",
    "Bad owner or permissions",
    "Load key",
    "client_loop:",
];

/// Whether an ssh exit reflects the client failing rather than the command
///
/// ssh exits 255 on its own errors, but a remote command may exit 255 too.
/// Only a 255 accompanied by an ssh client diagnostic counts as a transport
/// failure.
fn is_transport_failure(return_code: i32, stderr: &str) -> bool {
    return_code == SSH_TRANSPORT_FAILURE
        && stderr.lines().any(|line| {
            let line = line.trim_start();
            // `user@host: Permission denied (publickey).`
            line.contains("Permission denied (")
                || SSH_CLIENT_DIAGNOSTICS.iter().any(|d| line.starts_with(d))
        })
}

/// One host as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostHandle {
    /// Hostname or IP address
    pub host: String,
    /// Login user
    pub user: String,
    /// SSH port
    pub port: u16,
    /// Extra arguments for this host's ssh/scp invocations
    pub extra_args: Vec<String>,
}

impl HostHandle {
    /// Create a handle without extra arguments
    pub fn new(host: impl Into<String>, user: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port,
            extra_args: Vec::new(),
        }
    }

    /// Attach extra transport arguments
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// `user@host` destination, bracketing IPv6 literals
    #[must_use]
    pub fn target(&self) -> String {
        if self.host.contains(':') {
            format!("{}@[{}]", self.user, self.host)
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}

/// Per-host command results
pub type ExecutionResults = HashMap<HostHandle, Vec<ExecutionResult>>;

/// Per-host transfer results
pub type TransferResults = HashMap<HostHandle, Vec<TransferResult>>;

/// Runs commands and copies files on a set of hosts
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run `command` on every host
    ///
    /// With `echo`, output lines are printed as they arrive. A command exit
    /// status is reported in the result, whatever its value; implementations
    /// must not mistake a remote command that exits with the transport's own
    /// failure status for a transport error.
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed` if any host cannot be reached
    async fn execute(
        &self,
        hosts: &[HostHandle],
        command: &str,
        echo: bool,
    ) -> Result<ExecutionResults, ExecError>;

    /// Copy `local_path` to `dst` on every host
    ///
    /// # Errors
    /// Returns `ExecError::SpawnError` if the transfer program cannot start
    async fn put(
        &self,
        hosts: &[HostHandle],
        local_path: &Path,
        dst: &str,
        echo: bool,
    ) -> Result<TransferResults, ExecError>;
}

/// Engine backed by the OpenSSH client programs
#[derive(Debug, Clone, Default)]
pub struct OpenSshEngine {
    config: Arc<TransportConfig>,
}

impl OpenSshEngine {
    /// Create an engine using the given transport settings
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn ssh_args(config: &TransportConfig, host: &HostHandle, command: &str) -> Vec<String> {
        let mut args = config.common_args();
        args.extend(host.extra_args.iter().cloned());
        args.push("-p".to_string());
        args.push(host.port.to_string());
        args.push(host.target());
        args.push(command.to_string());
        args
    }

    fn scp_args(config: &TransportConfig, host: &HostHandle, src: &Path, dst: &str) -> Vec<String> {
        let mut args = config.common_args();
        args.extend(host.extra_args.iter().cloned());
        args.push("-P".to_string());
        args.push(host.port.to_string());
        args.push(src.display().to_string());
        args.push(format!("{}:{dst}", host.target()));
        args
    }

    async fn execute_one(
        config: Arc<TransportConfig>,
        host: HostHandle,
        command: String,
        echo: bool,
    ) -> Result<ExecutionResult, ExecError> {
        let args = Self::ssh_args(&config, &host, &command);
        debug!(program = %config.ssh_program, args = ?args, "spawning ssh");

        let prefix = host.target();
        let echo = if echo { Echo::Prefixed(&prefix) } else { Echo::Off };
        let captured = capture(Command::new(&config.ssh_program).args(&args), echo).await?;

        if is_transport_failure(captured.return_code, &captured.stderr) {
            return Err(ExecError::ConnectionFailed(format!(
                "{}:{}: {}",
                host.target(),
                host.port,
                captured.stderr.trim()
            )));
        }

        Ok(ExecutionResult {
            command,
            return_code: captured.return_code,
            stdout: captured.stdout,
            stderr: captured.stderr,
        })
    }

    async fn put_one(
        config: Arc<TransportConfig>,
        host: HostHandle,
        src: std::path::PathBuf,
        dst: String,
        echo: bool,
    ) -> Result<TransferResult, ExecError> {
        let args = Self::scp_args(&config, &host, &src, &dst);
        debug!(program = %config.scp_program, args = ?args, "spawning scp");

        let prefix = host.target();
        let echo = if echo { Echo::Prefixed(&prefix) } else { Echo::Off };
        let captured = capture(Command::new(&config.scp_program).args(&args), echo).await?;

        Ok(TransferResult {
            source: src.display().to_string(),
            destination: dst,
            return_code: captured.return_code,
        })
    }
}

#[async_trait]
impl ExecutionEngine for OpenSshEngine {
    #[instrument(skip(self, hosts), fields(hosts = hosts.len()))]
    async fn execute(
        &self,
        hosts: &[HostHandle],
        command: &str,
        echo: bool,
    ) -> Result<ExecutionResults, ExecError> {
        let mut tasks = JoinSet::new();
        for host in hosts {
            let config = Arc::clone(&self.config);
            let host = host.clone();
            let command = command.to_string();
            tasks.spawn(async move {
                let result = Self::execute_one(config, host.clone(), command, echo).await;
                (host, result)
            });
        }

        let mut results = ExecutionResults::new();
        while let Some(joined) = tasks.join_next().await {
            let (host, result) = joined.map_err(|e| ExecError::IoError(e.to_string()))?;
            results.entry(host).or_default().push(result?);
        }
        Ok(results)
    }

    #[instrument(skip(self, hosts), fields(hosts = hosts.len()))]
    async fn put(
        &self,
        hosts: &[HostHandle],
        local_path: &Path,
        dst: &str,
        echo: bool,
    ) -> Result<TransferResults, ExecError> {
        let mut tasks = JoinSet::new();
        for host in hosts {
            let config = Arc::clone(&self.config);
            let host = host.clone();
            let src = local_path.to_path_buf();
            let dst = dst.to_string();
            tasks.spawn(async move {
                let result = Self::put_one(config, host.clone(), src, dst, echo).await;
                (host, result)
            });
        }

        let mut results = TransferResults::new();
        while let Some(joined) = tasks.join_next().await {
            let (host, result) = joined.map_err(|e| ExecError::IoError(e.to_string()))?;
            results.entry(host).or_default().push(result?);
        }
        Ok(results)
    }
}
