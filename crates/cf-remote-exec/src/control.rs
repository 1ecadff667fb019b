//! Private directory holding control master sockets

use std::fs::{DirBuilder, Metadata, Permissions};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::getuid;
use tempfile::TempDir;
use tracing::debug;

use crate::error::ExecError;

/// ssh expands `%C` to a hash of local host, remote host, port and user
const CONTROL_SOCKET_TEMPLATE: &str = "%C";

const PRIVATE_MODE: u32 = 0o700;

/// Directory only the invoking user can reach
///
/// The default directory is created fresh under the temp dir and removed
/// when the last handle is dropped. A configured directory is created if
/// missing and left in place.
#[derive(Debug)]
pub struct ControlDir {
    path: PathBuf,
    _temp: Option<TempDir>,
}

impl ControlDir {
    /// Create the socket directory, or check a configured one
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if a configured directory is not a
    /// directory owned by the current user with no group or other access,
    /// and `ExecError::IoError` if it cannot be created
    pub fn create(configured: Option<&Path>) -> Result<Self, ExecError> {
        match configured {
            Some(path) => Self::configured(path),
            None => Self::temporary(),
        }
    }

    fn temporary() -> Result<Self, ExecError> {
        let temp = tempfile::Builder::new()
            .prefix("cf-remote-")
            .permissions(Permissions::from_mode(PRIVATE_MODE))
            .tempdir()?;
        verify_private(temp.path(), &std::fs::symlink_metadata(temp.path())?)?;

        debug!(path = %temp.path().display(), "created control directory");
        Ok(Self {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    fn configured(path: &Path) -> Result<Self, ExecError> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                DirBuilder::new()
                    .recursive(true)
                    .mode(PRIVATE_MODE)
                    .create(path)?;
                std::fs::symlink_metadata(path)?
            }
            Err(e) => return Err(e.into()),
        };
        verify_private(path, &meta)?;

        Ok(Self {
            path: path.to_path_buf(),
            _temp: None,
        })
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `ControlPath` value for ssh
    #[must_use]
    pub fn socket_template(&self) -> PathBuf {
        self.path.join(CONTROL_SOCKET_TEMPLATE)
    }
}

fn verify_private(path: &Path, meta: &Metadata) -> Result<(), ExecError> {
    let reject = |reason: &str| {
        Err(ExecError::ConfigError(format!(
            "control directory {}: {reason}",
            path.display()
        )))
    };

    if !meta.is_dir() {
        return reject("not a directory");
    }
    if meta.uid() != getuid().as_raw() {
        return reject("owned by another user");
    }
    if meta.mode() & 0o077 != 0 {
        return reject(&format!("mode {:o} allows group or other access", meta.mode() & 0o777));
    }
    Ok(())
}
