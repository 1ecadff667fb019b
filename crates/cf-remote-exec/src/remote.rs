//! Remote command execution over a multiplexed SSH session
//!
//! Each [`RemoteConnection`] owns an ssh control master (`ssh -M -N`) whose
//! socket later commands attach to, so authentication happens once per
//! connection rather than once per command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::control::ControlDir;
use crate::engine::{ExecutionEngine, HostHandle};
use crate::error::ExecError;
use crate::result::ExecutionResult;
use crate::traits::{Connection, IDENTITY_PROBE, probe_needs_elevation};

/// Background ssh control master process
///
/// Only ever polled and signalled, never waited on.
#[derive(Debug)]
pub struct ControlMaster {
    child: Mutex<Option<Child>>,
}

impl ControlMaster {
    /// Launch the master process without waiting for it
    ///
    /// # Errors
    /// Returns `ExecError::SpawnError` if the program cannot be started
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ExecError> {
        debug!(program = %program, args = ?args, "starting control master");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        Ok(Self {
            child: Mutex::new(Some(child)),
        })
    }

    /// Non-blocking check that the master is still running
    pub fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(status = %status, "control master has exited");
                *guard = None;
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to poll control master");
                false
            }
        }
    }

    /// Send SIGTERM if the master is still running
    ///
    /// Returns whether a signal was sent. Later calls are no-ops.
    pub fn terminate(&self) -> bool {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut child) = guard.take() else {
            return false;
        };
        if !matches!(child.try_wait(), Ok(None)) {
            return false;
        }
        let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
            return false;
        };

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid, "sent SIGTERM to control master");
                true
            }
            // exited between the poll and the signal
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pid, error = %e, "failed to signal control master");
                false
            }
        }
    }
}

impl Drop for ControlMaster {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Multiplexed SSH connection to one host
pub struct RemoteConnection {
    host: String,
    user: String,
    port: u16,
    key_path: Option<PathBuf>,
    control_path: PathBuf,
    master: ControlMaster,
    // dropped after `master` so the socket directory outlives the master
    _control_dir: Arc<ControlDir>,
    engine: Arc<dyn ExecutionEngine>,
    needs_elevation: bool,
}

impl std::fmt::Debug for RemoteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnection")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("key_path", &self.key_path)
            .field("control_path", &self.control_path)
            .field("needs_elevation", &self.needs_elevation)
            .finish_non_exhaustive()
    }
}

impl RemoteConnection {
    /// Start a control master for `user@host:port` and probe the session
    ///
    /// # Errors
    /// Returns the first failure from spawning the master or running the
    /// identity probe
    #[instrument(skip(engine, config, control_dir))]
    pub async fn open(
        engine: Arc<dyn ExecutionEngine>,
        config: &TransportConfig,
        control_dir: Arc<ControlDir>,
        host: &str,
        user: &str,
        port: u16,
        key_path: Option<PathBuf>,
    ) -> Result<Self, ExecError> {
        let control_path = control_dir.socket_template();

        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-p".to_string(),
            port.to_string(),
            format!("-oControlPath={}", control_path.display()),
        ];
        args.extend(config.common_args());
        if let Some(key) = &key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(HostHandle::new(host, user, port).target());

        let master = ControlMaster::spawn(&config.ssh_program, &args)?;

        let mut connection = Self {
            host: host.to_string(),
            user: user.to_string(),
            port,
            key_path,
            control_path,
            master,
            _control_dir: control_dir,
            engine,
            needs_elevation: true,
        };

        // dropping `connection` on failure terminates the master
        let probe = connection.run(IDENTITY_PROBE, true).await?;
        connection.needs_elevation = probe_needs_elevation(&probe);

        debug!(needs_elevation = connection.needs_elevation, "connection initialized");
        Ok(connection)
    }

    /// Control socket path template handed to ssh
    #[must_use]
    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// Whether the control master is still running
    #[must_use]
    pub fn is_multiplexed(&self) -> bool {
        self.master.is_alive()
    }

    fn handle(&self, extra_args: Vec<String>) -> HostHandle {
        HostHandle::new(&self.host, &self.user, self.port).with_extra_args(extra_args)
    }

    fn transport_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(key) = &self.key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        if self.master.is_alive() {
            debug!("control master is running, reusing it");
            args.push(format!("-oControlPath={}", self.control_path.display()));
        }
        args
    }
}

#[async_trait]
impl Connection for RemoteConnection {
    #[instrument(skip(self), fields(host = %self.host, user = %self.user))]
    async fn run(&self, command: &str, hide: bool) -> Result<ExecutionResult, ExecError> {
        let handle = self.handle(self.transport_args());
        let mut results = self.engine.execute(&[handle.clone()], command, !hide).await?;

        results
            .remove(&handle)
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| ExecError::MissingResult(handle.target()))
    }

    #[instrument(skip(self), fields(host = %self.host, user = %self.user))]
    async fn put(&self, source: &Path, hide: bool) -> Result<i32, ExecError> {
        let dst = source
            .file_name()
            .ok_or_else(|| ExecError::IoError(format!("no file name in {}", source.display())))?
            .to_string_lossy()
            .to_string();

        let handle = self.handle(self.transport_args());
        let mut results = self.engine.put(&[handle.clone()], source, &dst, !hide).await?;

        results
            .remove(&handle)
            .and_then(|r| r.into_iter().next())
            .map(|r| r.return_code)
            .ok_or_else(|| ExecError::MissingResult(handle.target()))
    }

    fn needs_elevation(&self) -> bool {
        self.needs_elevation
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> Option<u16> {
        Some(self.port)
    }

    fn close(&mut self) {
        if self.master.terminate() {
            info!(host = %self.host, user = %self.user, "closed control master");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_until_dead(master: &ControlMaster) {
        for _ in 0..100 {
            if !master.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process did not exit");
    }

    #[tokio::test]
    async fn test_master_terminate_running_process() {
        let master = ControlMaster::spawn("sleep", &["30".to_string()]).unwrap();
        assert!(master.is_alive());

        assert!(master.terminate());
        assert!(!master.is_alive());
        assert!(!master.terminate());
    }

    #[tokio::test]
    async fn test_master_terminate_after_exit_is_noop() {
        let master = ControlMaster::spawn("true", &[]).unwrap();
        wait_until_dead(&master).await;

        assert!(!master.terminate());
        assert!(!master.terminate());
    }

    #[tokio::test]
    async fn test_master_exited_before_first_poll() {
        let master = ControlMaster::spawn("true", &[]).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // no poll has reaped the child yet; terminate must not signal it
        assert!(!master.terminate());
    }

    #[test]
    fn test_master_spawn_missing_program() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let err = ControlMaster::spawn("/nonexistent/ssh", &[]).unwrap_err();
        assert!(matches!(err, ExecError::SpawnError(_)));
    }
}
