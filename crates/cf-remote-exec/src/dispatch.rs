//! Plain and sudo command dispatch
//!
//! Both return `Ok(None)` when the command exits non-zero: callers often
//! probe remote state where failure is an expected answer.

use tracing::{debug, error};

use crate::error::ExecError;
use crate::result::ExecutionResult;
use crate::traits::Connection;

/// Run `command` as the session user
///
/// On success returns stdout with CRLF converted to LF and trailing
/// newlines removed.
///
/// # Errors
/// Returns transport errors from the connection
pub async fn run_unprivileged(
    connection: &dyn Connection,
    command: &str,
    surface_errors: bool,
) -> Result<Option<String>, ExecError> {
    let result = connection.run(command, true).await?;
    if result.success() {
        let output = result
            .stdout
            .replace("\r\n", "\n")
            .trim_end_matches('\n')
            .to_string();
        debug!("'{command}' -> '{output}'");
        return Ok(Some(output));
    }

    let message = failure_message("Non-sudo", command, result.return_code);
    report_failure(&message, &result, surface_errors);
    Ok(None)
}

/// Run `command` with root privileges
///
/// Wraps the command in `sudo bash -c "..."` unless the session is already
/// root. On success returns stdout with trailing newlines removed.
///
/// # Errors
/// Returns transport errors from the connection
pub async fn run_privileged(
    connection: &dyn Connection,
    command: &str,
    surface_errors: bool,
) -> Result<Option<String>, ExecError> {
    let result = if connection.needs_elevation() {
        connection.run(&sudo_wrap(command), true).await?
    } else {
        connection.run(command, true).await?
    };

    if result.success() {
        let output = result.stdout.trim_end_matches('\n').to_string();
        debug!("'{command}' -> '{output}'");
        return Ok(Some(output));
    }

    let message = failure_message("Sudo", command, result.return_code);
    report_failure(&message, &result, surface_errors);
    Ok(None)
}

/// Wrap a command for execution through `sudo bash -c`
///
/// Only double quotes are escaped; `$`, backticks and backslashes are
/// still expanded by the login shell before sudo runs.
#[must_use]
pub fn sudo_wrap(command: &str) -> String {
    let escaped = command.replace('"', "\\\"");
    format!("sudo bash -c \"{escaped}\"")
}

fn failure_message(kind: &str, command: &str, return_code: i32) -> String {
    format!("{kind} command unexpectedly exited: '{command}' [{return_code}]")
}

fn report_failure(message: &str, result: &ExecutionResult, surface_errors: bool) {
    if surface_errors {
        println!("{}", result.stdout);
        println!("{}", result.stderr);
        error!("{message}");
    } else {
        debug!("{}", result.stdout);
        debug!("{}", result.stderr);
        debug!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_wrap_escapes_double_quotes() {
        assert_eq!(
            sudo_wrap(r#"echo "hi there" > /etc/motd"#),
            r#"sudo bash -c "echo \"hi there\" > /etc/motd""#
        );
    }

    #[test]
    fn test_sudo_wrap_plain() {
        assert_eq!(
            sudo_wrap("systemctl restart cfengine3"),
            "sudo bash -c \"systemctl restart cfengine3\""
        );
    }

    #[test]
    fn test_failure_message_names_command_and_code() {
        let msg = failure_message("Non-sudo", "ls /nope", 2);
        assert_eq!(msg, "Non-sudo command unexpectedly exited: 'ls /nope' [2]");
    }
}
