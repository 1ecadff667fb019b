//! Connection establishment: candidate user search and scoped use

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use crate::config::TransportConfig;
use crate::control::ControlDir;
use crate::engine::{ExecutionEngine, OpenSshEngine};
use crate::error::ExecError;
use crate::host::HostSpec;
use crate::local::{LOCALHOST, LocalConnection, current_user};
use crate::remote::RemoteConnection;
use crate::traits::Connection;

/// Command used to verify a freshly opened session
const LIVENESS_CHECK: &str = "whoami";

/// Opens connections by trying candidate users in order
///
/// Control sockets live in one private directory per connector, created on
/// the first remote connection. A temporary directory is removed once the
/// connector and every connection it opened are dropped.
pub struct Connector {
    engine: Arc<dyn ExecutionEngine>,
    config: TransportConfig,
    control_dir: OnceCell<Arc<ControlDir>>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("control_dir", &self.control_dir.get().map(|d| d.path()))
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Create a connector on top of an execution engine
    pub fn new(engine: Arc<dyn ExecutionEngine>, config: TransportConfig) -> Self {
        Self {
            engine,
            config,
            control_dir: OnceCell::new(),
        }
    }

    /// Create a connector that drives the system OpenSSH client
    #[must_use]
    pub fn openssh(config: TransportConfig) -> Self {
        let engine = Arc::new(OpenSshEngine::new(config.clone()));
        Self::new(engine, config)
    }

    /// Transport settings in use
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn control_dir(&self) -> Result<Arc<ControlDir>, ExecError> {
        let dir = self
            .control_dir
            .get_or_try_init(|| async {
                ControlDir::create(self.config.control_dir.as_deref()).map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(dir))
    }

    /// Users to try for `spec`, in order
    #[must_use]
    pub fn candidate_users(&self, spec: &HostSpec, explicit: Option<&[String]>) -> Vec<String> {
        build_candidates(spec, explicit, &self.config.fallback_users, &current_user())
    }

    /// Connect to `address`, trying each candidate user until one works
    ///
    /// # Errors
    /// Returns `ExecError::NoUsableUser` when every candidate fails at the
    /// transport level, `ExecError::InvalidHost` for a malformed address,
    /// `ExecError::ConfigError` for an unsafe control directory, and any
    /// non-transport error as soon as it occurs
    #[instrument(skip(self))]
    pub async fn connect(
        &self,
        address: &str,
        users: Option<&[String]>,
    ) -> Result<RemoteConnection, ExecError> {
        debug!(address = %address, "connecting");
        let spec = HostSpec::parse(address)?;
        let port = spec.port_or_default();
        let candidates = self.candidate_users(&spec, users);
        debug!(users = ?candidates, "candidate users");
        let control_dir = self.control_dir().await?;

        for user in &candidates {
            debug!("attempting ssh: {user}@{}:{port}", spec.host);
            let key_path = self.config.key_source().resolve();

            let attempt = async {
                let connection = RemoteConnection::open(
                    Arc::clone(&self.engine),
                    &self.config,
                    Arc::clone(&control_dir),
                    &spec.host,
                    user,
                    port,
                    key_path,
                )
                .await?;
                connection.run(LIVENESS_CHECK, true).await?;
                Ok::<_, ExecError>(connection)
            };

            match attempt.await {
                Ok(connection) => {
                    info!(host = %spec.host, user = %user, port, "connected");
                    return Ok(connection);
                }
                Err(e) if e.is_transport() => {
                    debug!(user = %user, error = %e, "attempt failed, trying next user");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExecError::NoUsableUser { host: spec.host })
    }

    /// Like [`connect`](Self::connect), but exits the process when no
    /// candidate user works
    ///
    /// # Errors
    /// Returns any error other than `ExecError::NoUsableUser`
    pub async fn connect_or_exit(
        &self,
        address: &str,
        users: Option<&[String]>,
    ) -> Result<RemoteConnection, ExecError> {
        match self.connect(address, users).await {
            Err(e @ ExecError::NoUsableUser { .. }) => {
                error!("{e}");
                eprintln!("{e}");
                std::process::exit(1);
            }
            other => other,
        }
    }

    /// Open `address`, using a local connection for `localhost`
    ///
    /// # Errors
    /// Same as [`connect_or_exit`](Self::connect_or_exit)
    pub async fn open(
        &self,
        address: &str,
        users: Option<&[String]>,
    ) -> Result<Box<dyn Connection>, ExecError> {
        if address == LOCALHOST {
            return Ok(Box::new(LocalConnection::new().await?));
        }
        Ok(Box::new(self.connect_or_exit(address, users).await?))
    }
}

/// Connect to `address`, run `f` with the connection, then close it
///
/// The connection is closed once `f` completes; if `f` panics, dropping
/// the connection still stops its control master.
///
/// # Errors
/// Returns connection errors; the value produced by `f` is passed through
pub async fn with_connection<F, T>(
    connector: &Connector,
    address: &str,
    users: Option<&[String]>,
    f: F,
) -> Result<T, ExecError>
where
    F: AsyncFnOnce(&dyn Connection) -> T,
{
    let mut connection = connector.open(address, users).await?;
    let output = f(&*connection).await;
    connection.close();
    Ok(output)
}

fn build_candidates(
    spec: &HostSpec,
    explicit: Option<&[String]>,
    fallback: &[String],
    invoking_user: &str,
) -> Vec<String> {
    if let Some(users) = explicit.filter(|u| !u.is_empty()) {
        return users.to_vec();
    }
    if let Some(user) = &spec.user {
        return vec![user.clone()];
    }

    // own name first, like ssh; repeated failures under unfamiliar names
    // can trip lockout policies
    let mut users = Vec::with_capacity(fallback.len() + 1);
    if !fallback.iter().any(|u| u == invoking_user) {
        users.push(invoking_user.to_string());
    }
    users.extend(fallback.iter().cloned());
    users
}
