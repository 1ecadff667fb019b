//! Local command execution using `tokio::process`

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::unistd::{User, getuid};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::result::ExecutionResult;
use crate::stream::{Echo, capture};
use crate::traits::{Connection, IDENTITY_PROBE, probe_needs_elevation};

/// Name reported for the local host
pub const LOCALHOST: &str = "localhost";

/// Connection to the machine this process runs on
///
/// Commands run through `sh` in the invoking user's home directory, with
/// stderr folded into stdout.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    user: String,
    home: PathBuf,
    needs_elevation: bool,
}

impl LocalConnection {
    /// Create a local connection and probe whether sudo is needed
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if the home directory is unknown, or
    /// `ExecError::SpawnError` if the identity probe cannot run
    pub async fn new() -> Result<Self, ExecError> {
        let home = dirs::home_dir()
            .ok_or_else(|| ExecError::ConfigError("cannot determine home directory".into()))?;

        let mut connection = Self {
            user: current_user(),
            home,
            needs_elevation: true,
        };
        let probe = connection.run(IDENTITY_PROBE, true).await?;
        connection.needs_elevation = probe_needs_elevation(&probe);

        debug!(
            user = %connection.user,
            needs_elevation = connection.needs_elevation,
            "local connection ready"
        );
        Ok(connection)
    }

    /// Home directory commands run in and files are copied to
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }
}

#[async_trait]
impl Connection for LocalConnection {
    #[instrument(skip(self), level = "debug")]
    async fn run(&self, command: &str, hide: bool) -> Result<ExecutionResult, ExecError> {
        debug!(command = %command, "executing local command");

        // stderr is redirected inside the shell so both streams interleave
        let script = format!("exec 2>&1\n{command}");
        let mut process = Command::new("sh");
        process.arg("-c").arg(&script).current_dir(&self.home);

        let echo = if hide { Echo::Off } else { Echo::Plain };
        let captured = capture(&mut process, echo).await?;

        debug!(command = %command, status = captured.return_code, "command completed");

        Ok(ExecutionResult {
            command: command.to_string(),
            return_code: captured.return_code,
            stdout: captured.stdout,
            stderr: String::new(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn put(&self, source: &Path, hide: bool) -> Result<i32, ExecError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| ExecError::IoError(format!("no file name in {}", source.display())))?;
        let dst = self.home.join(file_name);
        let src = tokio::fs::canonicalize(source).await?;

        if same_file(&src, &dst).await? {
            debug!(path = %src.display(), "source is already in place, skipping copy");
            return Ok(0);
        }

        if !hide {
            println!("Local copy: '{}' -> '{}'", src.display(), dst.display());
        }
        tokio::fs::copy(&src, &dst).await?;
        Ok(0)
    }

    fn needs_elevation(&self) -> bool {
        self.needs_elevation
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn host(&self) -> &str {
        LOCALHOST
    }
}

/// Whether `dst` exists and is the same file as `src`
async fn same_file(src: &Path, dst: &Path) -> Result<bool, ExecError> {
    let dst_meta = match tokio::fs::metadata(dst).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let src_meta = tokio::fs::metadata(src).await?;
    Ok(src_meta.dev() == dst_meta.dev() && src_meta.ino() == dst_meta.ino())
}

/// Login name of the invoking user
///
/// Falls back to `$USER` when the passwd database has no entry.
#[must_use]
pub fn current_user() -> String {
    User::from_uid(getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_in(home: &Path) -> LocalConnection {
        LocalConnection {
            user: current_user(),
            home: home.to_path_buf(),
            needs_elevation: true,
        }
    }

    #[tokio::test]
    async fn test_run_success() {
        let dir = tempfile::tempdir().unwrap();
        let connection = connection_in(dir.path());
        let result = connection.run("echo hello", true).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.command, "echo hello");
    }

    #[tokio::test]
    async fn test_run_failure_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let connection = connection_in(dir.path());
        let result = connection.run("exit 42", true).await.unwrap();

        assert!(!result.success());
        assert_eq!(result.return_code, 42);
    }

    #[tokio::test]
    async fn test_run_merges_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let connection = connection_in(dir.path());
        let result = connection.run("echo out; echo err >&2", true).await.unwrap();

        assert_eq!(result.stdout, "out\nerr\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_run_uses_home_as_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let connection = connection_in(dir.path());
        let result = connection.run("pwd -P", true).await.unwrap();

        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(result.stdout.trim(), expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_put_copies_into_home() {
        let home = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let src = elsewhere.path().join("package.rpm");
        std::fs::write(&src, b"payload").unwrap();

        let connection = connection_in(home.path());
        assert_eq!(connection.put(&src, true).await.unwrap(), 0);
        assert_eq!(std::fs::read(home.path().join("package.rpm")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_put_same_path_is_noop() {
        let home = tempfile::tempdir().unwrap();
        let src = home.path().join("already-here.txt");
        std::fs::write(&src, b"x").unwrap();
        let before = std::fs::metadata(&src).unwrap().modified().unwrap();

        let connection = connection_in(home.path());
        assert_eq!(connection.put(&src, true).await.unwrap(), 0);

        // tokio::fs::copy onto itself would truncate the file
        assert_eq!(std::fs::read(&src).unwrap(), b"x");
        assert_eq!(std::fs::metadata(&src).unwrap().modified().unwrap(), before);
    }

    #[tokio::test]
    async fn test_put_dotdot_path_to_file_in_home_is_noop() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join("sub")).unwrap();
        std::fs::write(home.path().join("pkg.deb"), b"payload").unwrap();

        let connection = connection_in(home.path());
        let src = home.path().join("sub").join("..").join("pkg.deb");
        assert_eq!(connection.put(&src, true).await.unwrap(), 0);

        assert_eq!(std::fs::read(home.path().join("pkg.deb")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_put_through_symlinked_home_is_noop() {
        let real = tempfile::tempdir().unwrap();
        let links = tempfile::tempdir().unwrap();
        let home = links.path().join("home");
        std::os::unix::fs::symlink(real.path(), &home).unwrap();
        std::fs::write(real.path().join("pkg.deb"), b"payload").unwrap();

        let connection = connection_in(&home);
        assert_eq!(connection.put(&real.path().join("pkg.deb"), true).await.unwrap(), 0);

        assert_eq!(std::fs::read(real.path().join("pkg.deb")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_put_missing_source_is_error() {
        let home = tempfile::tempdir().unwrap();
        let connection = connection_in(home.path());
        let err = connection
            .put(&home.path().join("absent.deb"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::IoError(_)));
    }

    #[tokio::test]
    async fn test_new_probes_identity() {
        let connection = LocalConnection::new().await.unwrap();
        assert_eq!(connection.needs_elevation(), !getuid().is_root());
        assert_eq!(connection.host(), LOCALHOST);
    }
}
