//! Configurable in-memory activity set for workflow tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use veritier_core::{scenario::merge_facts, Obligation, Rule, ScenarioFacts};
use veritier_verify::VerificationTier;

use crate::activities::{tier_display_name, Activities};
use crate::retry::ActivityError;
use crate::schemas::{
    CompliancePathway, ConflictResult, CounterfactualScenario, DeltaAnalysis, DriftSeverity,
    EquivalenceResult, JurisdictionAssignment, JurisdictionResult, JurisdictionStatus,
    RuleDriftResult, ScenarioResult, ScenarioType, TierResult,
};
use veritier_core::{ConsistencyEvidence, EvidenceLabel};

/// Mock activities: compliant, passing, and drift-free unless configured
/// otherwise. Rule ids starting with `no.` behave as missing rules.
#[derive(Default)]
pub struct MockActivities {
    corpus: Vec<String>,
    failing_tiers: HashSet<VerificationTier>,
    blocked: HashSet<String>,
    action: HashSet<String>,
    no_assignments: bool,
    fail_resolution: bool,
    drifting: HashSet<String>,
    erroring_drift: HashSet<String>,
    tier_gate: Option<Arc<tokio::sync::Semaphore>>,
    synthesize_failures: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockActivities {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn failing_tier(mut self, tier: VerificationTier) -> Self {
        self.failing_tiers.insert(tier);
        self
    }

    pub fn blocking_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.blocked.insert(jurisdiction.into());
        self
    }

    pub fn action_jurisdiction(mut self, jurisdiction: &str) -> Self {
        self.action.insert(jurisdiction.into());
        self
    }

    pub fn without_assignments(mut self) -> Self {
        self.no_assignments = true;
        self
    }

    pub fn failing_resolution(mut self) -> Self {
        self.fail_resolution = true;
        self
    }

    pub fn with_corpus(mut self, rule_ids: &[&str]) -> Self {
        self.corpus = rule_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn drifting_rule(mut self, rule_id: &str) -> Self {
        self.drifting.insert(rule_id.into());
        self
    }

    pub fn erroring_drift_check(mut self, rule_id: &str) -> Self {
        self.erroring_drift.insert(rule_id.into());
        self
    }

    /// Fail the next `n` pathway syntheses with a transient error.
    pub fn synthesize_transient_failures(self, n: usize) -> Self {
        self.synthesize_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Make every tier check wait for one permit before proceeding.
    pub fn gated(mut self, gate: Arc<tokio::sync::Semaphore>) -> Self {
        self.tier_gate = Some(gate);
        self
    }

    /// Peak number of drift checks in flight at once.
    pub fn max_in_flight_checks(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn decision_for(facts: &ScenarioFacts) -> &'static str {
        match facts.get("authorized") {
            Some(v) if v == &json!(false) => "prohibited",
            _ => "permitted",
        }
    }

    fn obligations_for(decision: &str) -> Vec<Obligation> {
        if decision == "permitted" {
            vec![Obligation {
                id: "whitepaper".into(),
                description: Some("Publish a whitepaper".into()),
                deadline: None,
            }]
        } else {
            vec![]
        }
    }
}

#[async_trait]
impl Activities for MockActivities {
    async fn resolve_jurisdictions(
        &self,
        issuer: &str,
        targets: &[String],
        _instrument_type: Option<&str>,
    ) -> Result<Vec<JurisdictionAssignment>, ActivityError> {
        if self.fail_resolution {
            return Err(ActivityError::Input("unknown issuer jurisdiction".into()));
        }
        if self.no_assignments {
            return Ok(vec![]);
        }
        let mut assignments = vec![JurisdictionAssignment {
            jurisdiction: issuer.to_string(),
            regime_id: format!("{issuer}:default"),
            role: "issuer_home".into(),
        }];
        for target in targets {
            assignments.push(JurisdictionAssignment {
                jurisdiction: target.clone(),
                regime_id: format!("{target}:default"),
                role: "target".into(),
            });
        }
        Ok(assignments)
    }

    async fn get_equivalences(
        &self,
        issuer: &str,
        targets: &[String],
    ) -> Result<Vec<EquivalenceResult>, ActivityError> {
        Ok(targets
            .first()
            .map(|target| EquivalenceResult {
                id: format!("{issuer}-{target}"),
                from_jurisdiction: issuer.to_string(),
                to_jurisdiction: target.clone(),
                scope: Some("prospectus".into()),
                status: "active".into(),
                effective_date: None,
                expiry_date: None,
                source_reference: None,
                notes: None,
            })
            .into_iter()
            .collect())
    }

    async fn evaluate_jurisdiction(
        &self,
        assignment: &JurisdictionAssignment,
        _facts: &ScenarioFacts,
    ) -> Result<JurisdictionResult, ActivityError> {
        let status = if self.blocked.contains(&assignment.jurisdiction) {
            JurisdictionStatus::Blocked
        } else if self.action.contains(&assignment.jurisdiction) {
            JurisdictionStatus::RequiresAction
        } else {
            JurisdictionStatus::Compliant
        };
        let obligations = if status == JurisdictionStatus::Blocked {
            vec![]
        } else {
            Self::obligations_for("permitted")
        };
        Ok(JurisdictionResult {
            jurisdiction: assignment.jurisdiction.clone(),
            regime_id: assignment.regime_id.clone(),
            role: assignment.role.clone(),
            applicable_rules: 1,
            rules_evaluated: 1,
            decisions: vec![json!({"decision": "permitted"})],
            obligations,
            status,
        })
    }

    async fn detect_conflicts(
        &self,
        _results: &[JurisdictionResult],
    ) -> Result<Vec<ConflictResult>, ActivityError> {
        Ok(vec![])
    }

    async fn synthesize_pathway(
        &self,
        results: &[JurisdictionResult],
        conflicts: &[ConflictResult],
        _equivalences: &[EquivalenceResult],
    ) -> Result<CompliancePathway, ActivityError> {
        if self
            .synthesize_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ActivityError::Transient("transient blip".into()));
        }
        let mut blocking_issues: Vec<String> = results
            .iter()
            .filter(|r| r.status == JurisdictionStatus::Blocked)
            .map(|r| format!("{}: blocked", r.jurisdiction))
            .collect();
        blocking_issues.extend(
            conflicts
                .iter()
                .filter(|c| c.severity == "critical")
                .map(|c| c.description.clone()),
        );
        Ok(CompliancePathway {
            feasible: blocking_issues.is_empty(),
            primary_jurisdiction: results
                .iter()
                .find(|r| r.role.contains("issuer"))
                .map(|r| r.jurisdiction.clone()),
            required_actions: vec![],
            blocking_issues,
            recommended_sequence: vec![],
        })
    }

    async fn aggregate_obligations(
        &self,
        results: &[JurisdictionResult],
    ) -> Result<Vec<Obligation>, ActivityError> {
        let mut seen = HashSet::new();
        Ok(results
            .iter()
            .flat_map(|r| r.obligations.iter().cloned())
            .filter(|o| seen.insert(o.id.clone()))
            .collect())
    }

    async fn load_rule(&self, rule_id: &str) -> Result<Rule, ActivityError> {
        if rule_id.starts_with("no.") {
            return Err(ActivityError::Input(format!("rule not found: {rule_id}")));
        }
        Ok(Rule {
            rule_id: rule_id.to_string(),
            description: format!("rule {rule_id}"),
            interpretation_notes: None,
            jurisdiction: Some("EU".into()),
            applies_if: None,
            decision_tree: None,
            effective_from: None,
            effective_to: None,
            source: None,
            tags: vec![],
            last_verified: None,
        })
    }

    async fn verify_tier(
        &self,
        rule_id: &str,
        tier: VerificationTier,
        _source_text: Option<&str>,
    ) -> Result<TierResult, ActivityError> {
        if rule_id.starts_with("no.") {
            return Err(ActivityError::Input(format!("rule not found: {rule_id}")));
        }
        if let Some(gate) = &self.tier_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| ActivityError::Transient("gate closed".into()))?;
            permit.forget();
        }
        let evidence = if self.failing_tiers.contains(&tier) {
            vec![ConsistencyEvidence::new(
                tier.number(),
                "check",
                EvidenceLabel::Fail,
                0.0,
                "configured to fail",
            )]
        } else {
            vec![ConsistencyEvidence::new(
                tier.number(),
                "check",
                EvidenceLabel::Pass,
                1.0,
                "ok",
            )]
        };
        Ok(TierResult::from_evidence(
            tier,
            tier_display_name(tier),
            evidence,
            1.0,
        ))
    }

    async fn evaluate_baseline(
        &self,
        rule_id: &str,
        facts: &ScenarioFacts,
    ) -> Result<ScenarioResult, ActivityError> {
        if rule_id.starts_with("no.") {
            return Err(ActivityError::Input(format!("rule not found: {rule_id}")));
        }
        let decision = Self::decision_for(facts);
        Ok(ScenarioResult {
            scenario_id: "baseline".into(),
            scenario_type: ScenarioType::Threshold,
            description: "Baseline scenario".into(),
            decision: decision.into(),
            applicable: true,
            obligations: Self::obligations_for(decision),
            trace: vec![],
            differs_from_baseline: false,
            key_differences: vec![],
        })
    }

    async fn analyze_counterfactual(
        &self,
        _rule_id: &str,
        baseline_facts: &ScenarioFacts,
        scenario: &CounterfactualScenario,
        baseline_decision: &str,
    ) -> Result<ScenarioResult, ActivityError> {
        let merged = merge_facts(baseline_facts, &scenario.modified_facts);
        let decision = Self::decision_for(&merged);
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
        Ok(ScenarioResult {
            scenario_id: scenario.scenario_id.clone(),
            scenario_type: scenario.scenario_type,
            description: scenario.description.clone(),
            decision: decision.into(),
            applicable: true,
            obligations: Self::obligations_for(decision),
            trace: vec![],
            differs_from_baseline: differs,
            key_differences,
        })
    }

    async fn compute_delta(
        &self,
        baseline: &ScenarioResult,
        counterfactual: &ScenarioResult,
    ) -> Result<DeltaAnalysis, ActivityError> {
        let baseline_ids: HashSet<&str> =
            baseline.obligations.iter().map(|o| o.id.as_str()).collect();
        let cf_ids: HashSet<&str> = counterfactual
            .obligations
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        Ok(DeltaAnalysis {
            scenario_id: counterfactual.scenario_id.clone(),
            decision_changed: baseline.decision != counterfactual.decision,
            original_decision: baseline.decision.clone(),
            new_decision: counterfactual.decision.clone(),
            obligations_added: cf_ids
                .difference(&baseline_ids)
                .map(|s| s.to_string())
                .collect(),
            obligations_removed: baseline_ids
                .difference(&cf_ids)
                .map(|s| s.to_string())
                .collect(),
            critical_factors: counterfactual.key_differences.clone(),
        })
    }

    async fn all_rule_ids(&self) -> Result<Vec<String>, ActivityError> {
        Ok(self.corpus.clone())
    }

    async fn check_rule_drift(&self, rule_id: &str) -> Result<RuleDriftResult, ActivityError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.erroring_drift.contains(rule_id) {
            return Err(ActivityError::Input("simulated check failure".into()));
        }
        let drifts = self.drifting.contains(rule_id);
        Ok(RuleDriftResult {
            rule_id: rule_id.to_string(),
            has_drift: drifts,
            drift_types: if drifts {
                vec!["schema_drift".into()]
            } else {
                vec![]
            },
            details: vec![],
            severity: if drifts {
                DriftSeverity::High
            } else {
                DriftSeverity::None
            },
            last_verified: None,
            current_check: Utc::now(),
        })
    }

    async fn notify_drift(&self, drifted: &[RuleDriftResult]) -> Result<usize, ActivityError> {
        Ok(drifted.len())
    }
}
