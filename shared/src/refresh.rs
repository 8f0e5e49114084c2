//! Generic scheduled fetch-and-publish loop.
//!
//! A `Refresher` owns exactly one background task that runs its task closure
//! immediately, then again every interval until stopped. Failures are
//! reported and the loop keeps its schedule: whatever the task published last
//! stays authoritative, and the next interval is the retry.

use crate::metrics_defs::REFRESH_ERRORS;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running refresh loop. Dropping it aborts the task; prefer
/// `stop()`, which waits for the task to confirm exit.
pub struct Refresher {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Spawns the refresh loop. The task runs once right away; cancellation is
/// only observed at the interval boundary, so an in-flight run always
/// completes (or hits its own I/O timeout) before the loop exits.
pub fn spawn<T, F, E>(name: &'static str, interval: Duration, mut task: T) -> Refresher
where
    T: FnMut() -> F + Send + 'static,
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        loop {
            if let Err(err) = task().await {
                crate::counter!(REFRESH_ERRORS, "task" => name).increment(1);
                tracing::error!(task = name, error = %err, "refresh failed, keeping previous data");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = loop_cancel.cancelled() => return,
            }
        }
    });

    Refresher {
        name,
        cancel,
        handle: Some(handle),
    }
}

impl Refresher {
    /// Signals the loop to exit and waits until the task is gone. Idempotent:
    /// stopping an already-stopped (or naturally exited) loop returns
    /// immediately.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await
                && !err.is_cancelled()
            {
                tracing::warn!(task = self.name, error = %err, "refresh task panicked");
            }
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
