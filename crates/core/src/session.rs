//! Cancellable sessions and guarded status updates.
//!
//! Each driver run gets a fresh [`CancellationToken`]. Every suspension point (request in
//! flight, delay before the next poll) is raced against that token, and every status mutation
//! re-checks it while holding the status lock. `cancel` flips the token under the same lock,
//! so once it returns no further mutation from the cancelled run can land.

use crate::error::{DriverError, DriverResult, Process};
use crate::step_log::{StepEntry, StepObserver};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) struct Session<S> {
    process: Process,
    status: watch::Sender<S>,
    current: Mutex<Option<CancellationToken>>,
    observer: Option<Arc<dyn StepObserver>>,
}

impl<S: Clone + Default> Session<S> {
    pub(crate) fn new(process: Process) -> Self {
        let (status, _) = watch::channel(S::default());
        Self {
            process,
            status,
            current: Mutex::new(None),
            observer: None,
        }
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn StepObserver>) {
        self.observer = Some(observer);
    }

    /// Start a new run, cancelling whatever run was in progress.
    pub(crate) fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Apply `f` (and record `step`) unless the run behind `token` was cancelled.
    pub(crate) fn update<F>(
        &self,
        token: &CancellationToken,
        step: Option<StepEntry>,
        f: F,
    ) -> DriverResult<()>
    where
        F: FnOnce(&mut S),
    {
        let mut applied = false;
        self.status.send_if_modified(|status| {
            if token.is_cancelled() {
                return false;
            }
            f(status);
            if let (Some(observer), Some(step)) = (&self.observer, step) {
                observer.record(step);
            }
            applied = true;
            true
        });

        if applied {
            Ok(())
        } else {
            Err(DriverError::Cancelled(self.process))
        }
    }

    /// Cancel the current run (if any) and apply `f` in the same critical section.
    pub(crate) fn cancel<F>(&self, f: F)
    where
        F: FnOnce(&mut S),
    {
        self.status.send_modify(|status| {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = current.take() {
                token.cancel();
            }
            f(status);
        });
    }

    pub(crate) fn snapshot(&self) -> S {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<S> {
        self.status.subscribe()
    }
}

/// Run `fut` unless `token` is cancelled first. A response that arrives after cancellation
/// is dropped.
pub(crate) async fn race<T, F>(
    token: &CancellationToken,
    process: Process,
    fut: F,
) -> DriverResult<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DriverError::Cancelled(process)),
        out = fut => Ok(out),
    }
}

/// Cancellable delay.
pub(crate) async fn pause(
    token: &CancellationToken,
    process: Process,
    delay: Duration,
) -> DriverResult<()> {
    race(token, process, tokio::time::sleep(delay)).await
}
