//! Copy a file to a host, optionally renaming it there

use std::path::Path;

use tracing::{debug, warn};

use crate::connect::{Connector, with_connection};
use crate::dispatch::run_unprivileged;
use crate::error::ExecError;
use crate::traits::Connection;

/// Connect to `address`, copy `local_file` to the home directory and
/// optionally rename it
///
/// The connection is closed before returning.
///
/// # Errors
/// Returns connection and transport errors
pub async fn copy(
    connector: &Connector,
    local_file: &Path,
    address: &str,
    rename_to: Option<&str>,
    hide: bool,
) -> Result<i32, ExecError> {
    with_connection(connector, address, None, async |connection: &dyn Connection| {
        copy_with(connection, local_file, address, rename_to, hide).await
    })
    .await?
}

/// Copy over an existing connection
///
/// Returns 0 on the normal path; a failed transfer is only logged.
///
/// # Errors
/// Returns transport errors from the connection
pub async fn copy_with(
    connection: &dyn Connection,
    local_file: &Path,
    address: &str,
    rename_to: Option<&str>,
    hide: bool,
) -> Result<i32, ExecError> {
    if !hide {
        println!("Copying: '{}' to '{address}'", local_file.display());
    }
    let return_code = connection.put(local_file, hide).await?;
    if return_code != 0 {
        warn!(file = %local_file.display(), host = %address, return_code, "transfer failed");
    }

    let Some(rename_to) = rename_to else {
        return Ok(0);
    };
    let file_name = local_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if file_name == rename_to {
        debug!(file = %file_name, "already has the requested name");
        return Ok(0);
    }

    if !hide {
        println!("Renaming '{file_name}' -> '{rename_to}' on '{address}'");
    }
    run_unprivileged(connection, &format!("mv {file_name} {rename_to}"), false).await?;
    Ok(0)
}
