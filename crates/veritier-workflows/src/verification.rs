//! Tiered rule verification workflow.
//!
//! Runs consistency tiers in ascending order against one rule. Tiers can be
//! skipped up front or mid-run, and `fail_fast` stops the ladder at the
//! first failing tier. Cheap structural checks therefore gate the expensive
//! ML-backed tiers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{info, instrument};
use uuid::Uuid;
use veritier_verify::VerificationTier;

use crate::activities::Activities;
use crate::handle::{RunHandle, VerificationHandle};
use crate::retry::{call_with_retry, RetryPolicy, TimeoutClass};
use crate::schemas::{
    RuleVerificationInput, RuleVerificationOutput, RuleVerificationProgress, TierResult,
    WorkflowStatus,
};

/// Spawn a verification run and return its handle.
pub fn start_rule_verification<A: Activities + 'static>(
    activities: Arc<A>,
    input: RuleVerificationInput,
) -> VerificationHandle {
    let run_id = Uuid::new_v4();
    let skip: Arc<Mutex<HashSet<VerificationTier>>> =
        Arc::new(Mutex::new(input.skip_tiers.iter().copied().collect()));

    let (progress_tx, progress_rx) = watch::channel(RuleVerificationProgress {
        run_id,
        status: WorkflowStatus::Pending,
        rule_id: input.rule_id.clone(),
        current_tier: None,
        tiers_completed: vec![],
        tiers_remaining: planned_tiers(&input),
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = VerificationRun {
        run_id,
        activities,
        policy: RetryPolicy::default(),
        progress: progress_tx,
        cancel: cancel_rx,
        skip: skip.clone(),
    };
    let join = tokio::spawn(run.execute(input));
    VerificationHandle::new(
        RunHandle::new(run_id, progress_rx, cancel_tx, join),
        skip,
    )
}

fn planned_tiers(input: &RuleVerificationInput) -> Vec<VerificationTier> {
    VerificationTier::ALL
        .iter()
        .copied()
        .filter(|t| t.number() <= input.max_tier.number() && !input.skip_tiers.contains(t))
        .collect()
}

struct VerificationRun<A> {
    run_id: Uuid,
    activities: Arc<A>,
    policy: RetryPolicy,
    progress: watch::Sender<RuleVerificationProgress>,
    cancel: watch::Receiver<bool>,
    skip: Arc<Mutex<HashSet<VerificationTier>>>,
}

impl<A: Activities> VerificationRun<A> {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn publish(
        &self,
        status: WorkflowStatus,
        rule_id: &str,
        current: Option<VerificationTier>,
        completed: &[TierResult],
        remaining: &[VerificationTier],
    ) {
        let _ = self.progress.send(RuleVerificationProgress {
            run_id: self.run_id,
            status,
            rule_id: rule_id.to_string(),
            current_tier: current,
            tiers_completed: completed.iter().map(|r| r.tier).collect(),
            tiers_remaining: remaining.to_vec(),
        });
    }

    fn settle(
        &self,
        input: &RuleVerificationInput,
        status: WorkflowStatus,
        started_at: chrono::DateTime<Utc>,
        tier_results: Vec<TierResult>,
        stopped_early: bool,
        stop_reason: Option<String>,
        error: Option<String>,
    ) -> RuleVerificationOutput {
        let highest_tier_passed = tier_results
            .iter()
            .rev()
            .find(|r| r.passed)
            .map(|r| r.tier);
        let overall_score = if tier_results.is_empty() {
            0.0
        } else {
            tier_results.iter().map(|r| r.score).sum::<f64>() / tier_results.len() as f64
        };
        let overall_passed =
            status == WorkflowStatus::Completed && tier_results.iter().all(|r| r.passed);
        self.publish(status, &input.rule_id, None, &tier_results, &[]);
        RuleVerificationOutput {
            run_id: self.run_id,
            status,
            started_at,
            completed_at: Some(Utc::now()),
            rule_id: input.rule_id.clone(),
            tier_results,
            highest_tier_passed,
            overall_score,
            overall_passed,
            stopped_early,
            stop_reason,
            error,
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id, rule_id = %input.rule_id))]
    async fn execute(self, input: RuleVerificationInput) -> RuleVerificationOutput {
        let started_at = Utc::now();
        let mut tier_results: Vec<TierResult> = Vec::new();
        let mut remaining = planned_tiers(&input);

        self.publish(
            WorkflowStatus::Running,
            &input.rule_id,
            None,
            &tier_results,
            &remaining,
        );

        // The rule must exist before any tier runs.
        let activities = self.activities.clone();
        let rule_id = input.rule_id.clone();
        if let Err(e) = call_with_retry(&self.policy, TimeoutClass::Short, "load_rule", || {
            let activities = activities.clone();
            let rule_id = rule_id.clone();
            async move { activities.load_rule(&rule_id).await }
        })
        .await
        {
            return self.settle(
                &input,
                WorkflowStatus::Failed,
                started_at,
                tier_results,
                true,
                Some(e.to_string()),
                Some(e.to_string()),
            );
        }

        let mut stopped_early = false;
        let mut stop_reason = None;

        while let Some(tier) = remaining.first().copied() {
            remaining.remove(0);

            if self.cancelled() {
                return self.settle(
                    &input,
                    WorkflowStatus::Cancelled,
                    started_at,
                    tier_results,
                    true,
                    Some("cancelled".into()),
                    None,
                );
            }
            // Mid-run skips take effect for tiers that have not started.
            if self.skip.lock().await.contains(&tier) {
                info!(tier = %tier, "tier skipped");
                continue;
            }

            self.publish(
                WorkflowStatus::Running,
                &input.rule_id,
                Some(tier),
                &tier_results,
                &remaining,
            );

            let activities = self.activities.clone();
            let rule_id = input.rule_id.clone();
            let source = input.source_text.clone();
            let outcome = call_with_retry(&self.policy, TimeoutClass::Medium, "verify_tier", || {
                let activities = activities.clone();
                let rule_id = rule_id.clone();
                let source = source.clone();
                async move {
                    activities
                        .verify_tier(&rule_id, tier, source.as_deref())
                        .await
                }
            })
            .await;

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    return self.settle(
                        &input,
                        WorkflowStatus::Failed,
                        started_at,
                        tier_results,
                        true,
                        Some(e.to_string()),
                        Some(e.to_string()),
                    );
                }
            };

            let passed = result.passed;
            let tier_name = result.tier_name.clone();
            tier_results.push(result);
            self.publish(
                WorkflowStatus::Running,
                &input.rule_id,
                None,
                &tier_results,
                &remaining,
            );

            if input.fail_fast && !passed {
                stopped_early = true;
                stop_reason = Some(format!("Tier {} ({tier_name}) failed", tier.number()));
                break;
            }
        }

        self.settle(
            &input,
            WorkflowStatus::Completed,
            started_at,
            tier_results,
            stopped_early,
            stop_reason,
            None,
        )
    }
}
