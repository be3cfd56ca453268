//! Corpus drift detection workflow.
//!
//! Periodically re-validates rules against their current stored state and
//! alerts on drift. Rules are checked in batches: sequential across
//! batches to bound load, concurrent within a batch. A rule whose check
//! itself fails still produces a drift entry rather than sinking the sweep.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::activities::Activities;
use crate::handle::RunHandle;
use crate::retry::{call_with_retry, RetryPolicy, TimeoutClass};
use crate::schemas::{
    DriftDetectionInput, DriftDetectionOutput, DriftDetectionProgress, DriftSeverity,
    RuleDriftResult, WorkflowStatus,
};

const BATCH_SIZE: usize = 10;

/// Spawn a drift sweep and return its handle.
pub fn start_drift_detection<A: Activities + 'static>(
    activities: Arc<A>,
    input: DriftDetectionInput,
) -> RunHandle<DriftDetectionProgress, DriftDetectionOutput> {
    let run_id = Uuid::new_v4();
    let (progress_tx, progress_rx) = watch::channel(DriftDetectionProgress {
        run_id,
        status: WorkflowStatus::Pending,
        total_rules: 0,
        checked_rules: 0,
        drift_detected: 0,
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = DriftRun {
        run_id,
        activities,
        policy: RetryPolicy::default(),
        progress: progress_tx,
        cancel: cancel_rx,
    };
    let join = tokio::spawn(run.execute(input));
    RunHandle::new(run_id, progress_rx, cancel_tx, join)
}

struct DriftRun<A> {
    run_id: Uuid,
    activities: Arc<A>,
    policy: RetryPolicy,
    progress: watch::Sender<DriftDetectionProgress>,
    cancel: watch::Receiver<bool>,
}

/// A failed check still yields a drift entry so one bad rule cannot sink
/// the sweep.
fn check_failed_entry(rule_id: &str, error: &str) -> RuleDriftResult {
    RuleDriftResult {
        rule_id: rule_id.to_string(),
        has_drift: true,
        drift_types: vec!["check_failed".into()],
        details: vec![format!("drift check failed: {error}")],
        severity: DriftSeverity::High,
        last_verified: None,
        current_check: Utc::now(),
    }
}

impl<A: Activities + 'static> DriftRun<A> {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn publish(&self, status: WorkflowStatus, total: usize, checked: usize, drifted: usize) {
        let _ = self.progress.send(DriftDetectionProgress {
            run_id: self.run_id,
            status,
            total_rules: total,
            checked_rules: checked,
            drift_detected: drifted,
        });
    }

    fn settle(
        &self,
        status: WorkflowStatus,
        started_at: chrono::DateTime<Utc>,
        drift_results: Vec<RuleDriftResult>,
        notifications_sent: usize,
        error: Option<String>,
    ) -> DriftDetectionOutput {
        let rules_with_drift = drift_results.iter().filter(|r| r.has_drift).count();
        DriftDetectionOutput {
            run_id: self.run_id,
            status,
            started_at,
            completed_at: Some(Utc::now()),
            rules_checked: drift_results.len(),
            rules_with_drift,
            drift_results,
            notifications_sent,
            error,
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id))]
    async fn execute(self, input: DriftDetectionInput) -> DriftDetectionOutput {
        let started_at = Utc::now();
        self.publish(WorkflowStatus::Running, 0, 0, 0);

        // An empty id list means the whole corpus.
        let rule_ids = if input.rule_ids.is_empty() {
            let activities = self.activities.clone();
            match call_with_retry(&self.policy, TimeoutClass::Short, "all_rule_ids", || {
                let activities = activities.clone();
                async move { activities.all_rule_ids().await }
            })
            .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    return self.settle(
                        WorkflowStatus::Failed,
                        started_at,
                        vec![],
                        0,
                        Some(e.to_string()),
                    );
                }
            }
        } else {
            input.rule_ids.clone()
        };

        let total = rule_ids.len();
        let mut drift_results: Vec<RuleDriftResult> = Vec::with_capacity(total);
        let mut drifted_count = 0usize;

        for batch in rule_ids.chunks(BATCH_SIZE) {
            if self.cancelled() {
                return self.settle(
                    WorkflowStatus::Cancelled,
                    started_at,
                    drift_results,
                    0,
                    None,
                );
            }

            let checks = batch.iter().map(|rule_id| {
                let activities = self.activities.clone();
                let policy = self.policy;
                let rule_id = rule_id.clone();
                async move {
                    let outcome = call_with_retry(
                        &policy,
                        TimeoutClass::Medium,
                        "check_rule_drift",
                        || {
                            let activities = activities.clone();
                            let rule_id = rule_id.clone();
                            async move { activities.check_rule_drift(&rule_id).await }
                        },
                    )
                    .await;
                    outcome.unwrap_or_else(|e| check_failed_entry(&rule_id, &e.to_string()))
                }
            });

            for result in join_all(checks).await {
                if result.has_drift {
                    drifted_count += 1;
                }
                drift_results.push(result);
            }
            self.publish(
                WorkflowStatus::Running,
                total,
                drift_results.len(),
                drifted_count,
            );
        }

        // Alert only on the drifted subset; a failed alert does not undo
        // the sweep's findings.
        let mut notifications_sent = 0;
        if input.notify_on_drift && drifted_count > 0 {
            let drifted: Vec<RuleDriftResult> = drift_results
                .iter()
                .filter(|r| r.has_drift)
                .cloned()
                .collect();
            let activities = self.activities.clone();
            match call_with_retry(&self.policy, TimeoutClass::Short, "notify_drift", || {
                let activities = activities.clone();
                let drifted = drifted.clone();
                async move { activities.notify_drift(&drifted).await }
            })
            .await
            {
                Ok(sent) => notifications_sent = sent,
                Err(e) => warn!(error = %e, "drift notification failed"),
            }
        }

        self.publish(WorkflowStatus::Completed, total, total, drifted_count);
        self.settle(
            WorkflowStatus::Completed,
            started_at,
            drift_results,
            notifications_sent,
            None,
        )
    }
}
