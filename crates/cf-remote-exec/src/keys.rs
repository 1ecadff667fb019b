//! SSH private key resolution

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Environment variable naming the private key used for every attempt
pub const SSH_KEY_ENV: &str = "CF_REMOTE_SSH_KEY";

/// Where the private key for a connection attempt comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Path read from an environment variable at resolution time
    Env(String),
    /// Let ssh pick its defaults (agent, `~/.ssh/id_*`)
    Default,
}

impl KeySource {
    /// Resolve to a key path, if any
    ///
    /// An unset or empty variable resolves to `None`.
    #[must_use]
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            KeySource::Path(path) => Some(expand_home(path)),
            KeySource::Env(var_name) => {
                let value = env::var(var_name).ok().filter(|v| !v.trim().is_empty())?;
                let path = expand_home(Path::new(value.trim()));
                debug!(var = %var_name, path = %path.display(), "using SSH key from environment");
                Some(path)
            }
            KeySource::Default => None,
        }
    }
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::Env(SSH_KEY_ENV.to_string())
    }
}

/// Expand a leading `~` to the invoking user's home directory
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
