//! The activity boundary: every external call a workflow can make.
//!
//! Workflows only ever talk to the `Activities` trait, so tests can drive
//! them with mocks and deployments can swap collaborators. `CoreActivities`
//! implements the rule-store- and verification-backed subset directly;
//! jurisdiction resolution and scenario evaluation stay behind their own
//! traits.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use veritier_core::{
    scenario::merge_facts, EvaluationOutcome, EvidenceLabel, Obligation, Rule, RuleStore,
    ScenarioFacts,
};
use veritier_verify::{ConsistencyEngine, VerificationTier};

use crate::notify::Notifier;
use crate::retry::ActivityError;
use crate::schemas::{
    CompliancePathway, ConflictResult, CounterfactualScenario, DeltaAnalysis, DriftSeverity,
    EquivalenceResult, JurisdictionAssignment, JurisdictionResult, JurisdictionStatus,
    RuleDriftResult, ScenarioResult, ScenarioType, TierResult,
};

/// Evaluates scenario facts against a rule's decision tree. External
/// collaborator; the orchestration layer treats it as a black box.
#[async_trait]
pub trait ScenarioEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        facts: &ScenarioFacts,
        rule_id: &str,
    ) -> Result<EvaluationOutcome, ActivityError>;
}

/// Resolves jurisdictions, equivalences, per-jurisdiction evaluation, and
/// conflicts. External collaborator.
#[async_trait]
pub trait JurisdictionOracle: Send + Sync {
    async fn resolve_jurisdictions(
        &self,
        issuer: &str,
        targets: &[String],
        instrument_type: Option<&str>,
    ) -> Result<Vec<JurisdictionAssignment>, ActivityError>;

    async fn get_equivalences(
        &self,
        issuer: &str,
        targets: &[String],
    ) -> Result<Vec<EquivalenceResult>, ActivityError>;

    async fn evaluate_jurisdiction(
        &self,
        assignment: &JurisdictionAssignment,
        facts: &ScenarioFacts,
    ) -> Result<JurisdictionResult, ActivityError>;

    async fn detect_conflicts(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<ConflictResult>, ActivityError>;
}

/// Everything a workflow may call across a suspension point.
#[async_trait]
pub trait Activities: Send + Sync {
    // ── compliance check ──
    async fn resolve_jurisdictions(
        &self,
        issuer: &str,
        targets: &[String],
        instrument_type: Option<&str>,
    ) -> Result<Vec<JurisdictionAssignment>, ActivityError>;

    async fn get_equivalences(
        &self,
        issuer: &str,
        targets: &[String],
    ) -> Result<Vec<EquivalenceResult>, ActivityError>;

    async fn evaluate_jurisdiction(
        &self,
        assignment: &JurisdictionAssignment,
        facts: &ScenarioFacts,
    ) -> Result<JurisdictionResult, ActivityError>;

    async fn detect_conflicts(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<ConflictResult>, ActivityError>;

    async fn synthesize_pathway(
        &self,
        results: &[JurisdictionResult],
        conflicts: &[ConflictResult],
        equivalences: &[EquivalenceResult],
    ) -> Result<CompliancePathway, ActivityError>;

    async fn aggregate_obligations(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<Obligation>, ActivityError>;

    // ── rule verification ──
    async fn load_rule(&self, rule_id: &str) -> Result<Rule, ActivityError>;

    async fn verify_tier(
        &self,
        rule_id: &str,
        tier: VerificationTier,
        source_text: Option<&str>,
    ) -> Result<TierResult, ActivityError>;

    // ── counterfactual analysis ──
    async fn evaluate_baseline(
        &self,
        rule_id: &str,
        facts: &ScenarioFacts,
    ) -> Result<ScenarioResult, ActivityError>;

    async fn analyze_counterfactual(
        &self,
        rule_id: &str,
        baseline_facts: &ScenarioFacts,
        scenario: &CounterfactualScenario,
        baseline_decision: &str,
    ) -> Result<ScenarioResult, ActivityError>;

    async fn compute_delta(
        &self,
        baseline: &ScenarioResult,
        counterfactual: &ScenarioResult,
    ) -> Result<DeltaAnalysis, ActivityError>;

    // ── drift detection ──
    async fn all_rule_ids(&self) -> Result<Vec<String>, ActivityError>;

    async fn check_rule_drift(&self, rule_id: &str) -> Result<RuleDriftResult, ActivityError>;

    async fn notify_drift(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError>;
}

/// Human-readable tier names used in `TierResult`.
pub fn tier_display_name(tier: VerificationTier) -> &'static str {
    match tier {
        VerificationTier::Structural => "Schema & Structural",
        VerificationTier::Lexical => "Lexical & Heuristic",
        VerificationTier::Semantic => "Semantic Similarity",
        VerificationTier::Entailment => "NLI Entailment",
        VerificationTier::CrossRule => "Cross-Rule Consistency",
    }
}

/// Production activity set backed by a rule store and the consistency
/// engine. Jurisdiction and scenario-evaluation collaborators are optional;
/// calling an operation without its collaborator is an input error.
pub struct CoreActivities {
    store: Arc<dyn RuleStore>,
    engine: ConsistencyEngine,
    evaluator: Option<Arc<dyn ScenarioEvaluator>>,
    oracle: Option<Arc<dyn JurisdictionOracle>>,
    notifier: Arc<dyn Notifier>,
}

impl CoreActivities {
    pub fn new(
        store: Arc<dyn RuleStore>,
        engine: ConsistencyEngine,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            engine,
            evaluator: None,
            oracle: None,
            notifier,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ScenarioEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn JurisdictionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    fn oracle(&self) -> Result<&Arc<dyn JurisdictionOracle>, ActivityError> {
        self.oracle
            .as_ref()
            .ok_or_else(|| ActivityError::Input("no jurisdiction oracle configured".into()))
    }

    fn evaluator(&self) -> Result<&Arc<dyn ScenarioEvaluator>, ActivityError> {
        self.evaluator
            .as_ref()
            .ok_or_else(|| ActivityError::Input("no scenario evaluator configured".into()))
    }

    fn get_rule(&self, rule_id: &str) -> Result<Rule, ActivityError> {
        self.store
            .get(rule_id)
            .ok_or_else(|| ActivityError::Input(format!("rule not found: {rule_id}")))
    }
}

fn scenario_result_from_outcome(
    scenario_id: &str,
    scenario_type: ScenarioType,
    description: &str,
    outcome: EvaluationOutcome,
    differs_from_baseline: bool,
    key_differences: Vec<String>,
) -> ScenarioResult {
    ScenarioResult {
        scenario_id: scenario_id.to_string(),
        scenario_type,
        description: description.to_string(),
        decision: outcome.decision.unwrap_or_else(|| "unknown".to_string()),
        applicable: outcome.applicable,
        obligations: outcome.obligations,
        trace: outcome.trace,
        differs_from_baseline,
        key_differences,
    }
}

fn parse_last_verified(rule: &Rule) -> Option<DateTime<Utc>> {
    rule.last_verified
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Activities for CoreActivities {
    async fn resolve_jurisdictions(
        &self,
        issuer: &str,
        targets: &[String],
        instrument_type: Option<&str>,
    ) -> Result<Vec<JurisdictionAssignment>, ActivityError> {
        self.oracle()?
            .resolve_jurisdictions(issuer, targets, instrument_type)
            .await
    }

    async fn get_equivalences(
        &self,
        issuer: &str,
        targets: &[String],
    ) -> Result<Vec<EquivalenceResult>, ActivityError> {
        self.oracle()?.get_equivalences(issuer, targets).await
    }

    async fn evaluate_jurisdiction(
        &self,
        assignment: &JurisdictionAssignment,
        facts: &ScenarioFacts,
    ) -> Result<JurisdictionResult, ActivityError> {
        self.oracle()?.evaluate_jurisdiction(assignment, facts).await
    }

    async fn detect_conflicts(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<ConflictResult>, ActivityError> {
        self.oracle()?.detect_conflicts(results).await
    }

    /// Feasibility and ordering derived from the evaluation results: blocked
    /// jurisdictions and critical conflicts block the pathway; obligations
    /// become the required actions, sequenced per jurisdiction.
    async fn synthesize_pathway(
        &self,
        results: &[JurisdictionResult],
        conflicts: &[ConflictResult],
        _equivalences: &[EquivalenceResult],
    ) -> Result<CompliancePathway, ActivityError> {
        let mut blocking_issues = Vec::new();
        for result in results {
            if result.status == JurisdictionStatus::Blocked {
                blocking_issues.push(format!(
                    "{}: activity blocked by regulatory requirements",
                    result.jurisdiction
                ));
            }
        }
        for conflict in conflicts {
            if conflict.severity == "critical" {
                blocking_issues.push(conflict.description.clone());
            }
        }

        let mut required_actions: Vec<String> = Vec::new();
        let mut recommended_sequence = Vec::new();
        for result in results {
            for obligation in &result.obligations {
                let action = obligation
                    .description
                    .clone()
                    .unwrap_or_else(|| obligation.id.clone());
                if !required_actions.contains(&action) {
                    required_actions.push(action.clone());
                }
                recommended_sequence.push(format!("{}: {action}", result.jurisdiction));
            }
        }

        let primary_jurisdiction = results
            .iter()
            .find(|r| r.role.contains("issuer"))
            .map(|r| r.jurisdiction.clone());

        Ok(CompliancePathway {
            feasible: blocking_issues.is_empty(),
            primary_jurisdiction,
            required_actions,
            blocking_issues,
            recommended_sequence,
        })
    }

    /// Deduplicate obligations across jurisdictions by id, keeping the
    /// first occurrence.
    async fn aggregate_obligations(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<Obligation>, ActivityError> {
        let mut seen = std::collections::BTreeSet::new();
        let mut aggregated = Vec::new();
        for result in results {
            for obligation in &result.obligations {
                if seen.insert(obligation.id.clone()) {
                    aggregated.push(obligation.clone());
                }
            }
        }
        Ok(aggregated)
    }

    async fn load_rule(&self, rule_id: &str) -> Result<Rule, ActivityError> {
        self.get_rule(rule_id)
    }

    async fn verify_tier(
        &self,
        rule_id: &str,
        tier: VerificationTier,
        source_text: Option<&str>,
    ) -> Result<TierResult, ActivityError> {
        let start = Instant::now();
        let rule = self.get_rule(rule_id)?;
        let related = if tier == VerificationTier::CrossRule {
            self.store.related_to(&rule.rule_id)
        } else {
            vec![]
        };
        let evidence = self.engine.run_tier(&rule, source_text, tier, &related);
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(rule_id, tier = %tier, checks = evidence.len(), "tier verified");
        Ok(TierResult::from_evidence(
            tier,
            tier_display_name(tier),
            evidence,
            duration_ms,
        ))
    }

    async fn evaluate_baseline(
        &self,
        rule_id: &str,
        facts: &ScenarioFacts,
    ) -> Result<ScenarioResult, ActivityError> {
        let outcome = self.evaluator()?.evaluate(facts, rule_id).await?;
        Ok(scenario_result_from_outcome(
            "baseline",
            ScenarioType::Threshold,
            "Baseline scenario",
            outcome,
            false,
            vec![],
        ))
    }

    async fn analyze_counterfactual(
        &self,
        rule_id: &str,
        baseline_facts: &ScenarioFacts,
        scenario: &CounterfactualScenario,
        baseline_decision: &str,
    ) -> Result<ScenarioResult, ActivityError> {
        let merged = merge_facts(baseline_facts, &scenario.modified_facts);
        let outcome = self.evaluator()?.evaluate(&merged, rule_id).await?;

        let decision = outcome.decision.clone().unwrap_or_else(|| "unknown".into());
        let differs = decision != baseline_decision;
        let mut key_differences = Vec::new();
        if differs {
            key_differences.push(format!(
                "Decision changed from {baseline_decision} to {decision}"
            ));
        }
        for (key, new_value) in &scenario.modified_facts {
            let old_value = baseline_facts.get(key);
            if old_value != Some(new_value) {
                let old = old_value
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".into());
                key_differences.push(format!("{key}: {old} -> {new_value}"));
            }
        }

        Ok(scenario_result_from_outcome(
            &scenario.scenario_id,
            scenario.scenario_type,
            &scenario.description,
            outcome,
            differs,
            key_differences,
        ))
    }

    async fn compute_delta(
        &self,
        baseline: &ScenarioResult,
        counterfactual: &ScenarioResult,
    ) -> Result<DeltaAnalysis, ActivityError> {
        let baseline_ids: std::collections::BTreeSet<&str> =
            baseline.obligations.iter().map(|o| o.id.as_str()).collect();
        let cf_ids: std::collections::BTreeSet<&str> = counterfactual
            .obligations
            .iter()
            .map(|o| o.id.as_str())
            .collect();

        Ok(DeltaAnalysis {
            scenario_id: counterfactual.scenario_id.clone(),
            decision_changed: baseline.decision != counterfactual.decision,
            original_decision: baseline.decision.clone(),
            new_decision: counterfactual.decision.clone(),
            obligations_added: cf_ids.difference(&baseline_ids).map(|s| s.to_string()).collect(),
            obligations_removed: baseline_ids.difference(&cf_ids).map(|s| s.to_string()).collect(),
            critical_factors: counterfactual.key_differences.clone(),
        })
    }

    async fn all_rule_ids(&self) -> Result<Vec<String>, ActivityError> {
        Ok(self.store.rule_ids())
    }

    /// Re-run structural validation against the current rule state. A
    /// missing rule is critical drift; failing structural evidence is
    /// schema drift; a `source_exists` warning is reference drift.
    async fn check_rule_drift(&self, rule_id: &str) -> Result<RuleDriftResult, ActivityError> {
        let now = Utc::now();
        let Some(rule) = self.store.get(rule_id) else {
            return Ok(RuleDriftResult {
                rule_id: rule_id.to_string(),
                has_drift: true,
                drift_types: vec!["rule_missing".into()],
                details: vec!["rule no longer exists in the rule store".into()],
                severity: DriftSeverity::Critical,
                last_verified: None,
                current_check: now,
            });
        };

        let evidence = self
            .engine
            .run_tier(&rule, None, VerificationTier::Structural, &[]);

        let mut drift_types: Vec<String> = Vec::new();
        let mut details = Vec::new();
        for item in &evidence {
            if item.label == EvidenceLabel::Fail {
                if !drift_types.iter().any(|t| t == "schema_drift") {
                    drift_types.push("schema_drift".into());
                }
                details.push(format!("schema check failed: {}", item.details));
            } else if item.label == EvidenceLabel::Warning && item.category == "source_exists" {
                drift_types.push("reference_drift".into());
                details.push(format!("reference issue: {}", item.details));
            }
        }

        let severity = if drift_types.iter().any(|t| t == "schema_drift") {
            DriftSeverity::High
        } else if drift_types.iter().any(|t| t == "reference_drift") {
            DriftSeverity::Medium
        } else if !drift_types.is_empty() {
            DriftSeverity::Low
        } else {
            DriftSeverity::None
        };

        Ok(RuleDriftResult {
            rule_id: rule_id.to_string(),
            has_drift: !drift_types.is_empty(),
            drift_types,
            details,
            severity,
            last_verified: parse_last_verified(&rule),
            current_check: now,
        })
    }

    async fn notify_drift(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError> {
        if drifted.is_empty() {
            return Ok(0);
        }
        info!(
            count = drifted.len(),
            rules = ?drifted.iter().map(|r| r.rule_id.as_str()).collect::<Vec<_>>(),
            "drift detected"
        );
        self.notifier.notify(drifted).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use serde_json::json;
    use veritier_core::{DecisionTree, InMemoryRuleStore};

    fn rule(id: &str, with_source: bool) -> Rule {
        Rule {
            rule_id: id.into(),
            description: format!("rule {id} description"),
            interpretation_notes: None,
            jurisdiction: Some("EU".into()),
            applies_if: None,
            decision_tree: Some(DecisionTree::Leaf {
                result: "permitted".into(),
            }),
            effective_from: None,
            effective_to: None,
            source: with_source.then(|| veritier_core::SourceRef {
                document_id: "DOC-1".into(),
                article: None,
            }),
            tags: vec![],
            last_verified: None,
        }
    }

    fn activities(rules: Vec<Rule>) -> CoreActivities {
        let store = InMemoryRuleStore::from_rules(rules).unwrap();
        CoreActivities::new(
            Arc::new(store),
            ConsistencyEngine::heuristic(),
            Arc::new(LogNotifier),
        )
    }

    #[tokio::test]
    async fn verify_tier_reports_duration_and_counts() {
        let acts = activities(vec![rule("eu.a", true)]);
        let result = acts
            .verify_tier("eu.a", VerificationTier::Structural, None)
            .await
            .unwrap();
        assert_eq!(result.tier, VerificationTier::Structural);
        assert_eq!(result.tier_name, "Schema & Structural");
        assert_eq!(result.checks_run, 6);
        assert!(result.passed);
        assert!(result.duration_ms >= 0.0);
    }

    #[tokio::test]
    async fn missing_rule_is_an_input_error() {
        let acts = activities(vec![]);
        let err = acts
            .verify_tier("missing", VerificationTier::Structural, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Input(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn drift_on_missing_rule_is_critical() {
        let acts = activities(vec![]);
        let drift = acts.check_rule_drift("gone").await.unwrap();
        assert!(drift.has_drift);
        assert_eq!(drift.severity, DriftSeverity::Critical);
        assert_eq!(drift.drift_types, vec!["rule_missing"]);
    }

    #[tokio::test]
    async fn sourceless_rule_drifts_with_reference_drift() {
        let acts = activities(vec![rule("eu.a", false)]);
        let drift = acts.check_rule_drift("eu.a").await.unwrap();
        assert!(drift.has_drift);
        assert_eq!(drift.severity, DriftSeverity::Medium);
        assert_eq!(drift.drift_types, vec!["reference_drift"]);
    }

    #[tokio::test]
    async fn clean_rule_has_no_drift() {
        let acts = activities(vec![rule("eu.a", true)]);
        let drift = acts.check_rule_drift("eu.a").await.unwrap();
        assert!(!drift.has_drift);
        assert_eq!(drift.severity, DriftSeverity::None);
    }

    #[tokio::test]
    async fn obligations_deduplicate_by_id() {
        let acts = activities(vec![]);
        let make = |jurisdiction: &str, obligations: Vec<Obligation>| JurisdictionResult {
            jurisdiction: jurisdiction.into(),
            regime_id: "regime".into(),
            role: "target".into(),
            applicable_rules: 1,
            rules_evaluated: 1,
            decisions: vec![json!({"decision": "permitted"})],
            obligations,
            status: JurisdictionStatus::Compliant,
        };
        let ob = |id: &str| Obligation {
            id: id.into(),
            description: Some(format!("obligation {id}")),
            deadline: None,
        };
        let results = vec![
            make("EU", vec![ob("whitepaper"), ob("notify")]),
            make("UK", vec![ob("whitepaper")]),
        ];
        let aggregated = acts.aggregate_obligations(&results).await.unwrap();
        assert_eq!(aggregated.len(), 2);
    }

    #[tokio::test]
    async fn jurisdiction_ops_without_oracle_are_input_errors() {
        let acts = activities(vec![]);
        let err = acts
            .resolve_jurisdictions("EU", &["UK".into()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Input(_)));
    }
}
