//! Counterfactual what-if analysis workflow.
//!
//! Evaluates a baseline scenario against one rule, then re-evaluates with
//! each scenario's fact overrides applied. Scenarios run concurrently; the
//! baseline must settle first since every scenario compares against its
//! decision.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::instrument;
use uuid::Uuid;

use crate::activities::Activities;
use crate::handle::RunHandle;
use crate::retry::{call_with_retry, RetryPolicy, TimeoutClass};
use crate::schemas::{
    CounterfactualInput, CounterfactualOutput, CounterfactualProgress, DeltaAnalysis,
    ScenarioResult, WorkflowStatus,
};

/// Spawn a counterfactual analysis and return its handle.
pub fn start_counterfactual_analysis<A: Activities + 'static>(
    activities: Arc<A>,
    input: CounterfactualInput,
) -> RunHandle<CounterfactualProgress, CounterfactualOutput> {
    let run_id = Uuid::new_v4();
    let (progress_tx, progress_rx) = watch::channel(CounterfactualProgress {
        run_id,
        status: WorkflowStatus::Pending,
        total_scenarios: input.scenarios.len(),
        completed_scenarios: 0,
        current_scenario: None,
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let run = CounterfactualRun {
        run_id,
        activities,
        policy: RetryPolicy::default(),
        progress: progress_tx,
        cancel: cancel_rx,
    };
    let join = tokio::spawn(run.execute(input));
    RunHandle::new(run_id, progress_rx, cancel_tx, join)
}

struct CounterfactualRun<A> {
    run_id: Uuid,
    activities: Arc<A>,
    policy: RetryPolicy,
    progress: watch::Sender<CounterfactualProgress>,
    cancel: watch::Receiver<bool>,
}

impl<A: Activities + 'static> CounterfactualRun<A> {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn publish(
        &self,
        status: WorkflowStatus,
        total: usize,
        completed: usize,
        current: Option<String>,
    ) {
        let _ = self.progress.send(CounterfactualProgress {
            run_id: self.run_id,
            status,
            total_scenarios: total,
            completed_scenarios: completed,
            current_scenario: current,
        });
    }

    fn settle(
        &self,
        input: &CounterfactualInput,
        status: WorkflowStatus,
        started_at: chrono::DateTime<Utc>,
        baseline_result: Option<ScenarioResult>,
        scenario_results: Vec<ScenarioResult>,
        delta_analyses: Vec<DeltaAnalysis>,
        error: Option<String>,
    ) -> CounterfactualOutput {
        let summary = match &baseline_result {
            Some(baseline) => {
                let differing = scenario_results
                    .iter()
                    .filter(|r| r.differs_from_baseline)
                    .count();
                format!(
                    "Analyzed {} counterfactual scenarios. {} resulted in different decisions from baseline ({}).",
                    scenario_results.len(),
                    differing,
                    baseline.decision
                )
            }
            None => String::new(),
        };
        CounterfactualOutput {
            run_id: self.run_id,
            status,
            started_at,
            completed_at: Some(Utc::now()),
            rule_id: input.rule_id.clone(),
            baseline_result,
            scenario_results,
            delta_analyses,
            summary,
            error,
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id, rule_id = %input.rule_id))]
    async fn execute(self, input: CounterfactualInput) -> CounterfactualOutput {
        let started_at = Utc::now();
        let total = input.scenarios.len();
        self.publish(
            WorkflowStatus::Running,
            total,
            0,
            Some("baseline".to_string()),
        );

        let activities = self.activities.clone();
        let rule_id = input.rule_id.clone();
        let facts = input.baseline_facts.clone();
        let baseline = match call_with_retry(
            &self.policy,
            TimeoutClass::Medium,
            "evaluate_baseline",
            || {
                let activities = activities.clone();
                let rule_id = rule_id.clone();
                let facts = facts.clone();
                async move { activities.evaluate_baseline(&rule_id, &facts).await }
            },
        )
        .await
        {
            Ok(baseline) => baseline,
            Err(e) => {
                return self.settle(
                    &input,
                    WorkflowStatus::Failed,
                    started_at,
                    None,
                    vec![],
                    vec![],
                    Some(e.to_string()),
                );
            }
        };

        if self.cancelled() {
            return self.settle(
                &input,
                WorkflowStatus::Cancelled,
                started_at,
                Some(baseline),
                vec![],
                vec![],
                None,
            );
        }

        // Every scenario compares against the settled baseline, so the
        // fan-out is embarrassingly parallel.
        let mut fan_out = FuturesUnordered::new();
        for (index, scenario) in input.scenarios.iter().cloned().enumerate() {
            let activities = self.activities.clone();
            let policy = self.policy;
            let rule_id = input.rule_id.clone();
            let baseline_facts = input.baseline_facts.clone();
            let baseline_decision = baseline.decision.clone();
            fan_out.push(async move {
                let result = call_with_retry(
                    &policy,
                    TimeoutClass::Medium,
                    "analyze_counterfactual",
                    || {
                        let activities = activities.clone();
                        let rule_id = rule_id.clone();
                        let baseline_facts = baseline_facts.clone();
                        let scenario = scenario.clone();
                        let baseline_decision = baseline_decision.clone();
                        async move {
                            activities
                                .analyze_counterfactual(
                                    &rule_id,
                                    &baseline_facts,
                                    &scenario,
                                    &baseline_decision,
                                )
                                .await
                        }
                    },
                )
                .await;
                (index, result)
            });
        }

        let mut indexed: Vec<(usize, ScenarioResult)> = Vec::with_capacity(total);
        let mut fan_out_error = None;
        while let Some((index, outcome)) = fan_out.next().await {
            match outcome {
                Ok(result) => indexed.push((index, result)),
                Err(e) => fan_out_error = Some(e),
            }
            self.publish(WorkflowStatus::Running, total, indexed.len(), None);
        }
        indexed.sort_by_key(|(index, _)| *index);
        let scenario_results: Vec<ScenarioResult> =
            indexed.into_iter().map(|(_, r)| r).collect();

        if let Some(e) = fan_out_error {
            return self.settle(
                &input,
                WorkflowStatus::Failed,
                started_at,
                Some(baseline),
                scenario_results,
                vec![],
                Some(e.to_string()),
            );
        }

        if self.cancelled() {
            return self.settle(
                &input,
                WorkflowStatus::Cancelled,
                started_at,
                Some(baseline),
                scenario_results,
                vec![],
                None,
            );
        }

        // Deltas, also in parallel, when requested.
        let mut delta_analyses = Vec::new();
        if input.include_delta_analysis {
            let mut deltas = FuturesUnordered::new();
            for (index, result) in scenario_results.iter().cloned().enumerate() {
                let activities = self.activities.clone();
                let policy = self.policy;
                let baseline = baseline.clone();
                deltas.push(async move {
                    let delta =
                        call_with_retry(&policy, TimeoutClass::Short, "compute_delta", || {
                            let activities = activities.clone();
                            let baseline = baseline.clone();
                            let result = result.clone();
                            async move { activities.compute_delta(&baseline, &result).await }
                        })
                        .await;
                    (index, delta)
                });
            }
            let mut indexed_deltas: Vec<(usize, DeltaAnalysis)> = Vec::with_capacity(total);
            while let Some((index, outcome)) = deltas.next().await {
                match outcome {
                    Ok(delta) => indexed_deltas.push((index, delta)),
                    Err(e) => {
                        return self.settle(
                            &input,
                            WorkflowStatus::Failed,
                            started_at,
                            Some(baseline),
                            scenario_results,
                            vec![],
                            Some(e.to_string()),
                        );
                    }
                }
            }
            indexed_deltas.sort_by_key(|(index, _)| *index);
            delta_analyses = indexed_deltas.into_iter().map(|(_, d)| d).collect();
        }

        self.publish(WorkflowStatus::Completed, total, total, None);
        self.settle(
            &input,
            WorkflowStatus::Completed,
            started_at,
            Some(baseline),
            scenario_results,
            delta_analyses,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{CounterfactualScenario, ScenarioType};
    use crate::testing::MockActivities;
    use serde_json::json;
    use veritier_core::ScenarioFacts;

    fn scenario(id: &str, facts: &[(&str, serde_json::Value)]) -> CounterfactualScenario {
        CounterfactualScenario {
            scenario_id: id.into(),
            scenario_type: ScenarioType::Threshold,
            description: format!("scenario {id}"),
            modified_facts: facts
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn input(scenarios: Vec<CounterfactualScenario>) -> CounterfactualInput {
        let mut baseline_facts = ScenarioFacts::new();
        baseline_facts.insert("authorized".into(), json!(true));
        CounterfactualInput {
            rule_id: "eu.mica.art36".into(),
            baseline_facts,
            scenarios,
            include_delta_analysis: true,
        }
    }

    #[tokio::test]
    async fn baseline_never_differs_from_itself() {
        let acts = Arc::new(MockActivities::passing());
        let handle = start_counterfactual_analysis(acts, input(vec![]));
        let output = handle.result().await.unwrap();

        assert_eq!(output.status, WorkflowStatus::Completed);
        let baseline = output.baseline_result.unwrap();
        assert_eq!(baseline.scenario_id, "baseline");
        assert!(!baseline.differs_from_baseline);
        assert!(baseline.key_differences.is_empty());
    }

    #[tokio::test]
    async fn unchanged_facts_produce_no_differences() {
        let acts = Arc::new(MockActivities::passing());
        let handle =
            start_counterfactual_analysis(acts, input(vec![scenario("noop", &[])]));
        let output = handle.result().await.unwrap();

        let result = &output.scenario_results[0];
        assert!(!result.differs_from_baseline);
        assert!(result.key_differences.is_empty());
        assert!(!output.delta_analyses[0].decision_changed);
    }

    #[tokio::test]
    async fn flipped_fact_changes_the_decision() {
        let acts = Arc::new(MockActivities::passing());
        let handle = start_counterfactual_analysis(
            acts,
            input(vec![scenario("revoke", &[("authorized", json!(false))])]),
        );
        let output = handle.result().await.unwrap();

        let result = &output.scenario_results[0];
        assert!(result.differs_from_baseline);
        assert_eq!(
            result.key_differences[0],
            "Decision changed from permitted to prohibited"
        );
        assert!(result
            .key_differences
            .iter()
            .any(|d| d == "authorized: true -> false"));

        let delta = &output.delta_analyses[0];
        assert!(delta.decision_changed);
        assert_eq!(delta.original_decision, "permitted");
        assert_eq!(delta.new_decision, "prohibited");
    }

    #[tokio::test]
    async fn scenario_results_keep_input_order() {
        let acts = Arc::new(MockActivities::passing());
        let handle = start_counterfactual_analysis(
            acts,
            input(vec![
                scenario("a", &[]),
                scenario("b", &[("authorized", json!(false))]),
                scenario("c", &[]),
            ]),
        );
        let output = handle.result().await.unwrap();
        let ids: Vec<&str> = output
            .scenario_results
            .iter()
            .map(|r| r.scenario_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn summary_counts_differing_scenarios() {
        let acts = Arc::new(MockActivities::passing());
        let handle = start_counterfactual_analysis(
            acts,
            input(vec![
                scenario("same", &[]),
                scenario("flip", &[("authorized", json!(false))]),
            ]),
        );
        let output = handle.result().await.unwrap();
        assert_eq!(
            output.summary,
            "Analyzed 2 counterfactual scenarios. 1 resulted in different decisions from baseline (permitted)."
        );
    }

    #[tokio::test]
    async fn delta_analysis_can_be_disabled() {
        let acts = Arc::new(MockActivities::passing());
        let mut input = input(vec![scenario("a", &[])]);
        input.include_delta_analysis = false;
        let handle = start_counterfactual_analysis(acts, input);
        let output = handle.result().await.unwrap();
        assert!(output.delta_analyses.is_empty());
    }

    #[tokio::test]
    async fn baseline_failure_fails_the_run() {
        let acts = Arc::new(MockActivities::passing());
        let mut input = input(vec![scenario("a", &[])]);
        input.rule_id = "no.such.rule".into();
        let handle = start_counterfactual_analysis(acts, input);
        let output = handle.result().await.unwrap();
        assert_eq!(output.status, WorkflowStatus::Failed);
        assert!(output.baseline_result.is_none());
        assert!(output.error.is_some());
    }
}
