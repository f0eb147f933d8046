//! Lifecycle of one child process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::types::Command;

/// A running child process.
///
/// The child is killed if this handle is dropped before it exits, so a lost
/// connection never leaves an orphan behind.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    program: String,
}

/// Start `command` with piped stdout/stderr and a null stdin.
///
/// An empty working directory falls back to `default_dir`.
pub fn spawn(
    command: &Command,
    default_dir: &Path,
) -> Result<(ChildProcess, ChildStdout, ChildStderr)> {
    let dir = if command.dir.is_empty() {
        default_dir.to_path_buf()
    } else {
        PathBuf::from(&command.dir)
    };

    let mut child = tokio::process::Command::new(&command.path)
        .args(&command.args)
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            path: command.path.clone(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("child stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("child stderr was not captured".to_string()))?;

    let process = ChildProcess {
        child,
        program: command.path.clone(),
    };
    Ok((process, stdout, stderr))
}

impl ChildProcess {
    /// OS process id, while the child has not been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// If `cancel` fires first the child is killed and reaped. A child that
    /// ends without an exit code (e.g. killed by a signal) is an error.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<u32> {
        let status = tokio::select! {
            status = self.child.wait() => status?,
            _ = cancel.cancelled() => {
                self.terminate().await;
                return Err(Error::Canceled);
            }
        };
        exit_code(status)
    }

    /// Kill the child and reap it. Errors are logged; a child that already
    /// exited is not an error.
    pub async fn terminate(&mut self) {
        match self.child.kill().await {
            Ok(()) => tracing::debug!(program = %self.program, "child terminated"),
            Err(e) => tracing::debug!(program = %self.program, error = %e, "failed to kill child"),
        }
    }
}

fn exit_code(status: ExitStatus) -> Result<u32> {
    match status.code() {
        Some(code) => Ok(code as u32),
        None => Err(Error::AbnormalExit(describe(status))),
    }
}

#[cfg(unix)]
fn describe(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) => format!("killed by signal {signal}"),
        None => status.to_string(),
    }
}

#[cfg(not(unix))]
fn describe(status: ExitStatus) -> String {
    status.to_string()
}
