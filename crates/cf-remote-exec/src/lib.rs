//! cf-remote-exec: Connection layer for running commands on hosts
//!
//! Provides a uniform [`Connection`] contract over the local machine and
//! multiplexed SSH sessions, connection establishment by candidate user
//! search, sudo-aware command dispatch and a copy helper.

pub mod config;
pub mod connect;
pub mod control;
pub mod copy;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod keys;
pub mod local;
pub mod remote;
pub mod result;
mod stream;
pub mod traits;

pub use config::{FALLBACK_USERS, TransportConfig};
pub use connect::{Connector, with_connection};
pub use control::ControlDir;
pub use copy::{copy, copy_with};
pub use dispatch::{run_privileged, run_unprivileged, sudo_wrap};
pub use engine::{ExecutionEngine, HostHandle, OpenSshEngine};
pub use error::ExecError;
pub use host::{DEFAULT_SSH_PORT, HostSpec};
pub use keys::{KeySource, SSH_KEY_ENV};
pub use local::{LOCALHOST, LocalConnection};
pub use remote::{ControlMaster, RemoteConnection};
pub use result::{ExecutionResult, TransferResult};
pub use traits::Connection;
