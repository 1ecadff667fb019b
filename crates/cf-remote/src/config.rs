//! Configuration loading and types

use std::path::{Path, PathBuf};

use cf_remote_exec::TransportConfig;
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "CF_REMOTE_CONFIG";

/// Top-level configuration for the cf-remote CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How hosts are reached
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let paths = [
            Some(PathBuf::from("cf-remote.toml")),
            dirs::config_dir().map(|p| p.join("cf-remote/cf-remote.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cf-remote.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[transport]
connect_timeout_secs = 3
fallback_users = ["ubuntu", "root"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.transport.connect_timeout_secs, 3);
        assert_eq!(config.transport.fallback_users, vec!["ubuntu", "root"]);
        assert_eq!(config.transport.ssh_program, "ssh");
        assert_eq!(config.transport.key_env, "CF_REMOTE_SSH_KEY");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cf-remote.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cf-remote.toml");
        std::fs::write(&path, "log_level = [").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
