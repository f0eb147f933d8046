//! Fail-fast join of the workers of one operation.
//!
//! Every worker of a group shares one cancellation token, derived from the
//! operation's own scope. The first worker to fail cancels the token, the
//! remaining workers unwind, and [`WorkerGroup::wait`] returns that first
//! error once every worker has finished.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A set of concurrent workers joined with first-error-wins semantics.
#[derive(Debug)]
pub struct WorkerGroup {
    tasks: JoinSet<(&'static str, Result<()>)>,
    cancel: CancellationToken,
}

impl WorkerGroup {
    /// Create a group whose scope is a child of `parent`.
    ///
    /// Cancelling `parent` cancels the group; a failing worker cancels only the
    /// group.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
        }
    }

    /// The group's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn an async worker. It is dropped at its next suspension point once
    /// the group is cancelled.
    pub fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let result = tokio::select! {
                biased;
                result = worker => result,
                _ = cancel.cancelled() => Err(Error::Canceled),
            };
            (name, result)
        });
    }

    /// Spawn a blocking worker. Blocking workers cannot observe the token; they
    /// must unwind when the pipes they own are closed by their siblings.
    pub fn spawn_blocking<F>(&mut self, name: &'static str, worker: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tasks.spawn_blocking(move || (name, worker()));
    }

    /// Wait for every worker and return the first error, if any.
    pub async fn wait(mut self) -> Result<()> {
        let mut first: Option<Error> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("<unknown>", Err(Error::Internal(format!("worker failed: {e}")))),
            };

            match result {
                Ok(()) => tracing::debug!(worker = name, "worker finished"),
                Err(e) if first.is_none() => {
                    tracing::debug!(worker = name, error = %e, "worker failed, cancelling group");
                    self.cancel.cancel();
                    first = Some(e);
                }
                Err(e) => tracing::debug!(worker = name, error = %e, "worker unwound"),
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
