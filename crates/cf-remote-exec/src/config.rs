//! Transport configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::keys::{KeySource, SSH_KEY_ENV};

/// Users tried, in order, when neither the caller nor the address names one
pub const FALLBACK_USERS: [&str; 7] = [
    "Administrator",
    "admin",
    "ubuntu",
    "ec2-user",
    "centos",
    "vagrant",
    "root",
];

/// How hosts are reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// ssh client program
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    /// scp program used for file transfers
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    /// `-o` options passed on every ssh/scp invocation
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,
    /// Seconds before ssh gives up on connection setup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Directory holding control master sockets
    ///
    /// Must be owned by the current user with mode 0700 if it exists.
    /// Defaults to a fresh private directory under the temp dir that is
    /// removed when the connections using it are gone.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    /// Environment variable holding the private key path
    #[serde(default = "default_key_env")]
    pub key_env: String,
    /// Users searched when no user is given
    #[serde(default = "default_fallback_users")]
    pub fallback_users: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_program: default_ssh_program(),
            scp_program: default_scp_program(),
            ssh_options: default_ssh_options(),
            connect_timeout_secs: default_connect_timeout(),
            control_dir: None,
            key_env: default_key_env(),
            fallback_users: default_fallback_users(),
        }
    }
}

impl TransportConfig {
    /// Key source for connection attempts
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        KeySource::Env(self.key_env.clone())
    }

    /// Options common to every ssh/scp invocation, in `-oKey=Value` form
    #[must_use]
    pub fn common_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.ssh_options.iter().map(|o| format!("-o{o}")).collect();
        args.push(format!("-oConnectTimeout={}", self.connect_timeout_secs));
        args
    }
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

fn default_ssh_options() -> Vec<String> {
    [
        "BatchMode=yes",
        "StrictHostKeyChecking=no",
        "UserKnownHostsFile=/dev/null",
        "LogLevel=ERROR",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_key_env() -> String {
    SSH_KEY_ENV.to_string()
}

fn default_fallback_users() -> Vec<String> {
    FALLBACK_USERS.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args() {
        let config = TransportConfig {
            ssh_options: vec!["BatchMode=yes".to_string()],
            connect_timeout_secs: 3,
            ..Default::default()
        };
        assert_eq!(
            config.common_args(),
            vec!["-oBatchMode=yes".to_string(), "-oConnectTimeout=3".to_string()]
        );
    }
}
