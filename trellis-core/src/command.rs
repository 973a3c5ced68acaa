//! Bounded-wait external command runner
//!
//! Every git/gh invocation goes through here: a hung external command must
//! never freeze a scan loop, so the child is polled against a deadline and
//! killed when it exceeds the bound.

use crate::error::TrellisError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_STEP: Duration = Duration::from_millis(50);

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, waiting at most `timeout`.
///
/// Stdout and stderr are drained on background threads so a chatty child
/// cannot deadlock on a full pipe while we poll its exit status.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> crate::Result<CommandOutput> {
    let label = command_label(&cmd);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            // Kill closes the pipes, which unblocks the reader threads.
            let _ = child.kill();
            let _ = child.wait();
            return Err(TrellisError::CommandTimeout {
                command: label,
                seconds: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_STEP);
    };

    let stdout = stdout_reader.map(join_reader).unwrap_or_default();
    let stderr = stderr_reader.map(join_reader).unwrap_or_default();

    Ok(CommandOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

/// Run a command and return its stdout, treating a non-zero exit as an error.
pub fn run_checked(cmd: Command, timeout: Duration) -> crate::Result<String> {
    let label = command_label(&cmd);
    let output = run_with_timeout(cmd, timeout)?;
    if !output.success {
        return Err(TrellisError::CommandFailed {
            command: label,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Human-readable command line for logs and error messages.
pub fn command_label(cmd: &Command) -> String {
    let mut label = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        label.push(' ');
        label.push_str(&arg.to_string_lossy());
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_checked_captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]);
        let out = run_checked(cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_nonzero_exit_is_command_failed() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let err = run_checked(cmd, Duration::from_secs(5)).unwrap_err();
        match err {
            TrellisError::CommandFailed { stderr, .. } => assert_eq!(stderr, "oops"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_hung_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let started = Instant::now();
        let err = run_with_timeout(cmd, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TrellisError::CommandTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_command_label_includes_args() {
        let mut cmd = Command::new("git");
        cmd.args(["pull", "origin", "main"]);
        assert_eq!(command_label(&cmd), "git pull origin main");
    }
}
