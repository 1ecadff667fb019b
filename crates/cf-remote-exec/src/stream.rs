//! Child process output capture with live echo

use std::io::Write;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::ExecError;

/// Where captured lines are echoed while the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Echo<'a> {
    Off,
    /// Written to stdout as-is
    Plain,
    /// Written to stdout as `(<prefix>) <line>`
    Prefixed(&'a str),
}

impl Echo<'_> {
    fn emit(self, line: &[u8]) {
        match self {
            Echo::Off => {}
            Echo::Plain => {
                let mut stdout = std::io::stdout().lock();
                // a closed stdout must not fail the command
                let _ = stdout.write_all(line).and_then(|()| stdout.flush());
            }
            Echo::Prefixed(prefix) => {
                let text = String::from_utf8_lossy(line);
                println!("({prefix}) {}", text.trim_end_matches(['\r', '\n']));
            }
        }
    }
}

/// Exit status and output of a finished process
#[derive(Debug)]
pub(crate) struct Captured {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion, echoing each output line as it arrives
///
/// # Errors
/// `ExecError::SpawnError` if the program cannot start, `ExecError::IoError`
/// if reading its output or waiting on it fails
pub(crate) async fn capture(command: &mut Command, echo: Echo<'_>) -> Result<Captured, ExecError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecError::SpawnError(e.to_string()))?;

    let (stdout, stderr) = tokio::try_join!(
        drain(child.stdout.take(), |line| echo.emit(line)),
        drain(child.stderr.take(), |line| echo.emit(line)),
    )?;
    let status = child.wait().await?;

    Ok(Captured {
        return_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Read `reader` to EOF, handing each line to `on_line` as soon as it is complete
async fn drain<R, F>(reader: Option<R>, mut on_line: F) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]),
{
    let mut collected = Vec::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(reader);
    loop {
        let start = collected.len();
        if reader.read_until(b'\n', &mut collected).await? == 0 {
            break;
        }
        on_line(&collected[start..]);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_capture_splits_streams() {
        let captured = capture(&mut sh("echo out; echo err >&2; exit 3"), Echo::Off)
            .await
            .unwrap();

        assert_eq!(captured.return_code, 3);
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_capture_keeps_unterminated_last_line() {
        let captured = capture(&mut sh("printf 'a\\nb'"), Echo::Off).await.unwrap();
        assert_eq!(captured.stdout, "a\nb");
    }

    #[tokio::test]
    async fn test_capture_replaces_invalid_utf8() {
        let captured = capture(&mut sh("printf 'ok\\377\\n'"), Echo::Off).await.unwrap();
        assert_eq!(captured.stdout, "ok\u{fffd}\n");
    }

    #[tokio::test]
    async fn test_capture_missing_program() {
        let err = capture(&mut Command::new("/nonexistent/ssh"), Echo::Off)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::SpawnError(_)));
    }

    #[tokio::test]
    async fn test_lines_arrive_before_process_exits() {
        let mut child = sh("echo first; sleep 1; echo second")
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        let started = Instant::now();
        let mut seen = Vec::new();
        let output = drain(child.stdout.take(), |line| {
            seen.push((String::from_utf8_lossy(line).into_owned(), started.elapsed()));
        })
        .await
        .unwrap();
        child.wait().await.unwrap();

        assert_eq!(output, b"first\nsecond\n");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "first\n");
        assert!(seen[0].1 < Duration::from_millis(800), "first line was held back");
        assert!(seen[1].1 >= Duration::from_millis(900));
    }
}
