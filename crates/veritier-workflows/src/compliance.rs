//! Cross-jurisdiction compliance check workflow.
//!
//! Resolves the jurisdictions a scenario touches, evaluates each in
//! parallel, then layers conflict detection and pathway synthesis on top.
//! Equivalence lookup runs concurrently with the evaluation fan-out since
//! neither depends on the other.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::instrument;
use uuid::Uuid;
use veritier_core::Obligation;

use crate::activities::Activities;
use crate::handle::RunHandle;
use crate::retry::{call_with_retry, RetryPolicy, TimeoutClass};
use crate::schemas::{
    ComplianceCheckInput, ComplianceCheckOutput, ComplianceCheckProgress, CompliancePathway,
    ConflictResult, EquivalenceResult, JurisdictionResult, JurisdictionStatus, WorkflowStatus,
};

/// Spawn a compliance check and return its handle.
pub fn start_compliance_check<A: Activities + 'static>(
    activities: Arc<A>,
    input: ComplianceCheckInput,
) -> RunHandle<ComplianceCheckProgress, ComplianceCheckOutput> {
    let run_id = Uuid::new_v4();
    let (progress_tx, progress_rx) = watch::channel(ComplianceCheckProgress {
        run_id,
        status: WorkflowStatus::Pending,
        total_jurisdictions: 0,
        completed_jurisdictions: 0,
        current_phase: "resolving".into(),
        phase_progress: 0.0,
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = ComplianceRun {
        run_id,
        activities,
        policy: RetryPolicy::default(),
        progress: progress_tx,
        cancel: cancel_rx,
    };
    let join = tokio::spawn(run.execute(input));
    RunHandle::new(run_id, progress_rx, cancel_tx, join)
}

/// Fold per-jurisdiction verdicts into one overall verdict. Any blocked
/// jurisdiction blocks the whole check.
fn compute_overall_status(results: &[JurisdictionResult]) -> JurisdictionStatus {
    if results.is_empty() {
        return JurisdictionStatus::NoApplicableRules;
    }
    if results
        .iter()
        .any(|r| r.status == JurisdictionStatus::Blocked)
    {
        return JurisdictionStatus::Blocked;
    }
    if results
        .iter()
        .any(|r| r.status == JurisdictionStatus::RequiresAction)
    {
        return JurisdictionStatus::RequiresAction;
    }
    if results
        .iter()
        .all(|r| r.status == JurisdictionStatus::Compliant)
    {
        return JurisdictionStatus::Compliant;
    }
    JurisdictionStatus::RequiresAction
}

struct ComplianceRun<A> {
    run_id: Uuid,
    activities: Arc<A>,
    policy: RetryPolicy,
    progress: watch::Sender<ComplianceCheckProgress>,
    cancel: watch::Receiver<bool>,
}

struct PartialState {
    jurisdiction_results: Vec<JurisdictionResult>,
    equivalences: Vec<EquivalenceResult>,
    conflicts: Vec<ConflictResult>,
    pathway: Option<CompliancePathway>,
    aggregated_obligations: Vec<Obligation>,
}

impl PartialState {
    fn empty() -> Self {
        Self {
            jurisdiction_results: vec![],
            equivalences: vec![],
            conflicts: vec![],
            pathway: None,
            aggregated_obligations: vec![],
        }
    }
}

impl<A: Activities + 'static> ComplianceRun<A> {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn publish(&self, status: WorkflowStatus, total: usize, completed: usize, phase: &str) {
        let phase_progress = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };
        let _ = self.progress.send(ComplianceCheckProgress {
            run_id: self.run_id,
            status,
            total_jurisdictions: total,
            completed_jurisdictions: completed,
            current_phase: phase.to_string(),
            phase_progress,
        });
    }

    fn settle(
        &self,
        input: &ComplianceCheckInput,
        status: WorkflowStatus,
        started_at: chrono::DateTime<Utc>,
        state: PartialState,
        overall_status: JurisdictionStatus,
        error: Option<String>,
    ) -> ComplianceCheckOutput {
        ComplianceCheckOutput {
            run_id: self.run_id,
            status,
            started_at,
            completed_at: Some(Utc::now()),
            issuer_jurisdiction: input.issuer_jurisdiction.clone(),
            target_jurisdictions: input.target_jurisdictions.clone(),
            jurisdiction_results: state.jurisdiction_results,
            equivalences: state.equivalences,
            conflicts: state.conflicts,
            pathway: state.pathway,
            aggregated_obligations: state.aggregated_obligations,
            overall_status,
            error,
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id, issuer = %input.issuer_jurisdiction))]
    async fn execute(self, input: ComplianceCheckInput) -> ComplianceCheckOutput {
        let started_at = Utc::now();
        let mut state = PartialState::empty();
        self.publish(WorkflowStatus::Running, 0, 0, "resolving");

        // Phase 1: which (jurisdiction, regime, role) triples apply.
        let activities = self.activities.clone();
        let issuer = input.issuer_jurisdiction.clone();
        let targets = input.target_jurisdictions.clone();
        let instrument = input.instrument_type.clone();
        let assignments = match call_with_retry(
            &self.policy,
            TimeoutClass::Medium,
            "resolve_jurisdictions",
            || {
                let activities = activities.clone();
                let issuer = issuer.clone();
                let targets = targets.clone();
                let instrument = instrument.clone();
                async move {
                    activities
                        .resolve_jurisdictions(&issuer, &targets, instrument.as_deref())
                        .await
                }
            },
        )
        .await
        {
            Ok(assignments) => assignments,
            Err(e) => {
                return self.settle(
                    &input,
                    WorkflowStatus::Failed,
                    started_at,
                    state,
                    JurisdictionStatus::Blocked,
                    Some(e.to_string()),
                );
            }
        };
        let total = assignments.len();

        if self.cancelled() {
            let overall = compute_overall_status(&state.jurisdiction_results);
            return self.settle(
                &input,
                WorkflowStatus::Cancelled,
                started_at,
                state,
                overall,
                None,
            );
        }

        // Equivalence lookup is independent of the evaluation fan-out, so
        // start it first and collect it afterwards.
        let equivalence_task = input.include_equivalences.then(|| {
            let activities = self.activities.clone();
            let policy = self.policy;
            let issuer = input.issuer_jurisdiction.clone();
            let targets = input.target_jurisdictions.clone();
            tokio::spawn(async move {
                call_with_retry(&policy, TimeoutClass::Medium, "get_equivalences", || {
                    let activities = activities.clone();
                    let issuer = issuer.clone();
                    let targets = targets.clone();
                    async move { activities.get_equivalences(&issuer, &targets).await }
                })
                .await
            })
        });

        // Phase 2: evaluate every jurisdiction concurrently.
        self.publish(WorkflowStatus::Running, total, 0, "evaluating");
        let mut fan_out = FuturesUnordered::new();
        for (index, assignment) in assignments.iter().cloned().enumerate() {
            let activities = self.activities.clone();
            let policy = self.policy;
            let facts = input.facts.clone();
            fan_out.push(async move {
                let result = call_with_retry(
                    &policy,
                    TimeoutClass::Medium,
                    "evaluate_jurisdiction",
                    || {
                        let activities = activities.clone();
                        let assignment = assignment.clone();
                        let facts = facts.clone();
                        async move {
                            activities.evaluate_jurisdiction(&assignment, &facts).await
                        }
                    },
                )
                .await;
                (index, result)
            });
        }

        let mut indexed: Vec<(usize, JurisdictionResult)> = Vec::with_capacity(total);
        let mut fan_out_error = None;
        while let Some((index, outcome)) = fan_out.next().await {
            match outcome {
                Ok(result) => indexed.push((index, result)),
                Err(e) => fan_out_error = Some(e),
            }
            self.publish(
                WorkflowStatus::Running,
                total,
                indexed.len(),
                "evaluating",
            );
        }
        indexed.sort_by_key(|(index, _)| *index);
        state.jurisdiction_results = indexed.into_iter().map(|(_, r)| r).collect();

        if let Some(task) = equivalence_task {
            match task.await {
                Ok(Ok(equivalences)) => state.equivalences = equivalences,
                Ok(Err(e)) => fan_out_error = Some(e),
                Err(_) => {
                    return self.settle(
                        &input,
                        WorkflowStatus::Failed,
                        started_at,
                        state,
                        JurisdictionStatus::Blocked,
                        Some("equivalence task aborted".into()),
                    );
                }
            }
        }
        if let Some(e) = fan_out_error {
            return self.settle(
                &input,
                WorkflowStatus::Failed,
                started_at,
                state,
                JurisdictionStatus::Blocked,
                Some(e.to_string()),
            );
        }

        if self.cancelled() {
            let overall = compute_overall_status(&state.jurisdiction_results);
            return self.settle(
                &input,
                WorkflowStatus::Cancelled,
                started_at,
                state,
                overall,
                None,
            );
        }

        // Phase 3: conflicts across the evaluated jurisdictions.
        if input.detect_conflicts {
            self.publish(WorkflowStatus::Running, total, total, "detecting_conflicts");
            let activities = self.activities.clone();
            let results = state.jurisdiction_results.clone();
            match call_with_retry(&self.policy, TimeoutClass::Medium, "detect_conflicts", || {
                let activities = activities.clone();
                let results = results.clone();
                async move { activities.detect_conflicts(&results).await }
            })
            .await
            {
                Ok(conflicts) => state.conflicts = conflicts,
                Err(e) => {
                    return self.settle(
                        &input,
                        WorkflowStatus::Failed,
                        started_at,
                        state,
                        JurisdictionStatus::Blocked,
                        Some(e.to_string()),
                    );
                }
            }
        }

        // Phase 4: synthesize a pathway and aggregate obligations.
        self.publish(WorkflowStatus::Running, total, total, "synthesizing");
        let activities = self.activities.clone();
        let results = state.jurisdiction_results.clone();
        let conflicts = state.conflicts.clone();
        let equivalences = state.equivalences.clone();
        let pathway =
            call_with_retry(&self.policy, TimeoutClass::Short, "synthesize_pathway", || {
                let activities = activities.clone();
                let results = results.clone();
                let conflicts = conflicts.clone();
                let equivalences = equivalences.clone();
                async move {
                    activities
                        .synthesize_pathway(&results, &conflicts, &equivalences)
                        .await
                }
            })
            .await;
        match pathway {
            Ok(pathway) => state.pathway = Some(pathway),
            Err(e) => {
                return self.settle(
                    &input,
                    WorkflowStatus::Failed,
                    started_at,
                    state,
                    JurisdictionStatus::Blocked,
                    Some(e.to_string()),
                );
            }
        }
        let activities = self.activities.clone();
        let results = state.jurisdiction_results.clone();
        let aggregated = call_with_retry(
            &self.policy,
            TimeoutClass::Short,
            "aggregate_obligations",
            || {
                let activities = activities.clone();
                let results = results.clone();
                async move { activities.aggregate_obligations(&results).await }
            },
        )
        .await;
        match aggregated {
            Ok(obligations) => state.aggregated_obligations = obligations,
            Err(e) => {
                return self.settle(
                    &input,
                    WorkflowStatus::Failed,
                    started_at,
                    state,
                    JurisdictionStatus::Blocked,
                    Some(e.to_string()),
                );
            }
        }

        let overall_status = compute_overall_status(&state.jurisdiction_results);
        self.publish(WorkflowStatus::Completed, total, total, "completed");
        self.settle(
            &input,
            WorkflowStatus::Completed,
            started_at,
            state,
            overall_status,
            None,
        )
    }
}
