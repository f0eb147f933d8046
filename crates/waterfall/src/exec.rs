//! Remote command execution with live output.

use std::sync::Arc;

use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::group::WorkerGroup;
use crate::mux::{copy_to_channel, multiplex};
use crate::process::{self, ChildProcess};
use crate::stream::MessageSink;
use crate::types::{CmdProgress, Command};

/// A started command whose output has not been streamed yet.
#[derive(Debug)]
pub struct Execution {
    process: ChildProcess,
    stdout: ChildStdout,
    stderr: ChildStderr,
    program: String,
}

impl Execution {
    /// Validate `command` and start the child process.
    ///
    /// Stdin redirection is rejected before anything is spawned. The program
    /// path is not checked up front so that the host's own error surfaces.
    pub fn start(command: Command, config: &ServiceConfig) -> Result<Self> {
        if command.pipe_in {
            return Err(Error::Unimplemented(
                "stdin redirection is not implemented".to_string(),
            ));
        }
        if command.path.is_empty() {
            return Err(Error::InvalidArgument(
                "exec requires a program path".to_string(),
            ));
        }

        let (process, stdout, stderr) = process::spawn(&command, &config.default_dir)?;
        tracing::info!(
            program = %command.path,
            args = ?command.args,
            dir = %command.dir,
            pid = ?process.id(),
            "process started"
        );

        Ok(Self {
            process,
            stdout,
            stderr,
            program: command.path,
        })
    }

    /// OS process id of the child.
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Stream the child's output to `sink`, then its exit code.
    ///
    /// The exit code is sent exactly once, after every output chunk. If any
    /// worker fails, or `cancel` fires, the child is killed and the error is
    /// returned instead of an exit code.
    pub async fn run<K>(
        self,
        sink: K,
        cancel: &CancellationToken,
        config: &ServiceConfig,
    ) -> Result<u32>
    where
        K: MessageSink<CmdProgress>,
    {
        let Self {
            mut process,
            stdout,
            stderr,
            program,
        } = self;
        let sink = Arc::new(sink);
        let chunk_size = config.chunk_size();

        let (stdout_tx, stdout_rx) = mpsc::channel(1);
        let (stderr_tx, stderr_rx) = mpsc::channel(1);

        let mut group = WorkerGroup::new(cancel);
        group.spawn("stdout", async move {
            copy_to_channel(stdout, stdout_tx, chunk_size).await?;
            Ok(())
        });
        group.spawn("stderr", async move {
            copy_to_channel(stderr, stderr_tx, chunk_size).await?;
            Ok(())
        });
        let mux_sink = Arc::clone(&sink);
        group.spawn("multiplex", async move {
            multiplex(stdout_rx, stderr_rx, &*mux_sink).await
        });

        if let Err(e) = group.wait().await {
            tracing::warn!(program = %program, error = %e, "exec aborted");
            process.terminate().await;
            return Err(e);
        }

        let code = process.wait(cancel).await?;
        tracing::info!(program = %program, code, "process exited");
        sink.send(CmdProgress::Exit(code)).await?;
        Ok(code)
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn sh(script: &str) -> Command {
        Command {
            path: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        }
    }

    async fn run_collect(command: Command) -> (Result<u32>, Vec<CmdProgress>) {
        let config = ServiceConfig::default();
        let exec = Execution::start(command, &config).unwrap();
        let (tx, mut rx) = mpsc::channel(config.channel_capacity);
        let task = tokio::spawn(async move {
            exec.run(tx, &CancellationToken::new(), &config).await
        });

        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        (task.await.unwrap(), messages)
    }

    #[tokio::test]
    async fn test_exit_code_is_last_message() {
        for code in [0u32, 1, 137] {
            let (result, messages) = run_collect(sh(&format!("echo out; exit {code}"))).await;
            assert_eq!(result.unwrap(), code);
            assert_eq!(messages.last(), Some(&CmdProgress::Exit(code)));
            let exits = messages
                .iter()
                .filter(|m| matches!(m, CmdProgress::Exit(_)))
                .count();
            assert_eq!(exits, 1);
        }
    }

    #[tokio::test]
    async fn test_output_is_complete() {
        let script = "head -c 1000000 /dev/zero; head -c 300000 /dev/zero | tr '\\0' x >&2";
        let (result, messages) = run_collect(sh(script)).await;
        assert_eq!(result.unwrap(), 0);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for msg in messages {
            match msg {
                CmdProgress::Stdout(b) => stdout.extend(b),
                CmdProgress::Stderr(b) => stderr.extend(b),
                CmdProgress::Exit(_) => {}
            }
        }
        assert_eq!(stdout.len(), 1_000_000);
        assert!(stdout.iter().all(|b| *b == 0));
        assert_eq!(stderr.len(), 300_000);
        assert!(stderr.iter().all(|b| *b == b'x'));
    }

    #[tokio::test]
    async fn test_pipe_in_is_unimplemented() {
        let command = Command {
            pipe_in: true,
            ..sh("true")
        };
        let err = Execution::start(command, &ServiceConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Unimplemented(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_signal_death_is_error_without_exit_message() {
        let (result, messages) = run_collect(sh("kill -9 $$")).await;
        assert!(matches!(result, Err(Error::AbnormalExit(_))));
        assert!(!messages.iter().any(|m| matches!(m, CmdProgress::Exit(_))));
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let config = ServiceConfig::default();
        let exec = Execution::start(sh("exec sleep 30"), &config).unwrap();
        let pid = exec.id().unwrap();
        let (tx, _rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { exec.run(tx, &cancel, &config).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Canceled)));

        #[cfg(target_os = "linux")]
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
        let _ = pid;
    }

    #[tokio::test]
    async fn test_closed_sink_fails_exec() {
        let config = ServiceConfig::default();
        let exec = Execution::start(sh("yes"), &config).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            exec.run(tx, &CancellationToken::new(), &config),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Error::Closed)), "got {result:?}");
    }
}
