//! Handles for in-flight workflow runs.
//!
//! A workflow runs on a spawned task and owns its mutable state; the handle
//! is the caller's side of the run. Progress arrives as snapshots over a
//! watch channel, cancellation is a cooperative flag the workflow checks
//! between suspension points, and termination aborts the task outright.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;
use veritier_verify::VerificationTier;

use crate::schemas::{RuleVerificationOutput, RuleVerificationProgress};

#[derive(Debug, Error)]
pub enum RunError {
    /// The run's task was aborted before producing an output.
    #[error("workflow run was terminated")]
    Terminated,
}

/// Caller-side handle to a spawned workflow run.
pub struct RunHandle<P, O> {
    run_id: Uuid,
    progress: watch::Receiver<P>,
    cancel: watch::Sender<bool>,
    join: JoinHandle<O>,
}

impl<P: Clone, O> RunHandle<P, O> {
    pub(crate) fn new(
        run_id: Uuid,
        progress: watch::Receiver<P>,
        cancel: watch::Sender<bool>,
        join: JoinHandle<O>,
    ) -> Self {
        Self {
            run_id,
            progress,
            cancel,
            join,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> P {
        self.progress.borrow().clone()
    }

    /// Receiver for awaiting progress changes.
    pub fn subscribe(&self) -> watch::Receiver<P> {
        self.progress.clone()
    }

    /// Request cooperative cancellation. The workflow finishes its current
    /// step, then settles with a cancelled output carrying partial results.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Abort the run's task immediately. No output is produced.
    pub fn terminate(&self) {
        self.join.abort();
    }

    /// Await the run's terminal output.
    pub async fn result(self) -> Result<O, RunError> {
        match self.join.await {
            Ok(output) => Ok(output),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(RunError::Terminated),
        }
    }
}

/// Verification runs additionally accept mid-run tier skips.
pub struct VerificationHandle {
    inner: RunHandle<RuleVerificationProgress, RuleVerificationOutput>,
    skip: Arc<Mutex<HashSet<VerificationTier>>>,
}

impl VerificationHandle {
    pub(crate) fn new(
        inner: RunHandle<RuleVerificationProgress, RuleVerificationOutput>,
        skip: Arc<Mutex<HashSet<VerificationTier>>>,
    ) -> Self {
        Self { inner, skip }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id()
    }

    pub fn progress(&self) -> RuleVerificationProgress {
        self.inner.progress()
    }

    pub fn subscribe(&self) -> watch::Receiver<RuleVerificationProgress> {
        self.inner.subscribe()
    }

    /// Skip a tier that has not started yet. Skipping the tier currently
    /// executing has no effect on it.
    pub async fn skip_tier(&self, tier: VerificationTier) {
        self.skip.lock().await.insert(tier);
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn terminate(&self) {
        self.inner.terminate();
    }

    pub async fn result(self) -> Result<RuleVerificationOutput, RunError> {
        self.inner.result().await
    }
}
