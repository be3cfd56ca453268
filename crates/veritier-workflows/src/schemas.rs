//! Workflow input, output, and progress records.
//!
//! Everything here is a plain serializable value: workflows own the mutable
//! state and publish these as snapshots or terminal outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veritier_core::{ConsistencyEvidence, Obligation, ScenarioFacts, TraceStep};
use veritier_verify::VerificationTier;

/// Terminal and in-flight workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Per-jurisdiction evaluation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionStatus {
    Compliant,
    Blocked,
    RequiresAction,
    NoApplicableRules,
}

/// Counterfactual scenario categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    JurisdictionChange,
    EntityChange,
    ActivityRestructure,
    Threshold,
    Temporal,
    ProtocolChange,
    RegulatoryChange,
}

// ── Compliance check ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckInput {
    pub issuer_jurisdiction: String,
    pub target_jurisdictions: Vec<String>,
    #[serde(default)]
    pub facts: ScenarioFacts,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default = "default_true")]
    pub include_equivalences: bool,
    #[serde(default = "default_true")]
    pub detect_conflicts: bool,
}

fn default_true() -> bool {
    true
}

/// A resolved (jurisdiction, regime, role) triple to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionAssignment {
    pub jurisdiction: String,
    pub regime_id: String,
    /// `issuer_home` or `target`.
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionResult {
    pub jurisdiction: String,
    pub regime_id: String,
    pub role: String,
    pub applicable_rules: usize,
    pub rules_evaluated: usize,
    pub decisions: Vec<serde_json::Value>,
    pub obligations: Vec<Obligation>,
    pub status: JurisdictionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceResult {
    pub id: String,
    pub from_jurisdiction: String,
    pub to_jurisdiction: String,
    pub scope: Option<String>,
    pub status: String,
    pub effective_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub source_reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResult {
    pub conflict_id: String,
    pub jurisdictions: Vec<String>,
    pub rule_ids: Vec<String>,
    pub conflict_type: String,
    pub description: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompliancePathway {
    pub feasible: bool,
    pub primary_jurisdiction: Option<String>,
    pub required_actions: Vec<String>,
    pub blocking_issues: Vec<String>,
    pub recommended_sequence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckOutput {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub issuer_jurisdiction: String,
    pub target_jurisdictions: Vec<String>,
    pub jurisdiction_results: Vec<JurisdictionResult>,
    pub equivalences: Vec<EquivalenceResult>,
    pub conflicts: Vec<ConflictResult>,
    pub pathway: Option<CompliancePathway>,
    pub aggregated_obligations: Vec<Obligation>,
    pub overall_status: JurisdictionStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheckProgress {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub total_jurisdictions: usize,
    pub completed_jurisdictions: usize,
    pub current_phase: String,
    /// Fraction of the jurisdiction fan-out completed, in [0, 1].
    pub phase_progress: f64,
}

// ── Rule verification ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVerificationInput {
    pub rule_id: String,
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default = "default_max_tier")]
    pub max_tier: VerificationTier,
    #[serde(default)]
    pub skip_tiers: Vec<VerificationTier>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

fn default_max_tier() -> VerificationTier {
    VerificationTier::CrossRule
}

/// One tier's aggregated outcome within a verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    pub tier: VerificationTier,
    pub tier_name: String,
    pub passed: bool,
    pub score: f64,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub evidence: Vec<ConsistencyEvidence>,
    pub duration_ms: f64,
}

impl TierResult {
    /// Fold a tier's evidence: passed iff no fail label, score = mean
    /// evidence score (0 when the tier produced none).
    pub fn from_evidence(
        tier: VerificationTier,
        tier_name: impl Into<String>,
        evidence: Vec<ConsistencyEvidence>,
        duration_ms: f64,
    ) -> Self {
        let checks_run = evidence.len();
        let checks_passed = evidence
            .iter()
            .filter(|e| e.label == veritier_core::EvidenceLabel::Pass)
            .count();
        let passed = !evidence
            .iter()
            .any(|e| e.label == veritier_core::EvidenceLabel::Fail);
        let score = if checks_run == 0 {
            0.0
        } else {
            evidence.iter().map(|e| e.score).sum::<f64>() / checks_run as f64
        };
        Self {
            tier,
            tier_name: tier_name.into(),
            passed,
            score,
            checks_run,
            checks_passed,
            evidence,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVerificationOutput {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rule_id: String,
    pub tier_results: Vec<TierResult>,
    pub highest_tier_passed: Option<VerificationTier>,
    pub overall_score: f64,
    pub overall_passed: bool,
    pub stopped_early: bool,
    pub stop_reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVerificationProgress {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub rule_id: String,
    pub current_tier: Option<VerificationTier>,
    pub tiers_completed: Vec<VerificationTier>,
    pub tiers_remaining: Vec<VerificationTier>,
}

// ── Counterfactual analysis ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualScenario {
    pub scenario_id: String,
    pub scenario_type: ScenarioType,
    pub description: String,
    #[serde(default)]
    pub modified_facts: ScenarioFacts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualInput {
    pub rule_id: String,
    #[serde(default)]
    pub baseline_facts: ScenarioFacts,
    pub scenarios: Vec<CounterfactualScenario>,
    #[serde(default = "default_true")]
    pub include_delta_analysis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub scenario_type: ScenarioType,
    pub description: String,
    pub decision: String,
    pub applicable: bool,
    pub obligations: Vec<Obligation>,
    pub trace: Vec<TraceStep>,
    pub differs_from_baseline: bool,
    pub key_differences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaAnalysis {
    pub scenario_id: String,
    pub decision_changed: bool,
    pub original_decision: String,
    pub new_decision: String,
    pub obligations_added: Vec<String>,
    pub obligations_removed: Vec<String>,
    pub critical_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualOutput {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rule_id: String,
    pub baseline_result: Option<ScenarioResult>,
    pub scenario_results: Vec<ScenarioResult>,
    pub delta_analyses: Vec<DeltaAnalysis>,
    pub summary: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualProgress {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub total_scenarios: usize,
    pub completed_scenarios: usize,
    pub current_scenario: Option<String>,
}

// ── Drift detection ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetectionInput {
    /// Specific rules to check; empty means the full corpus.
    #[serde(default)]
    pub rule_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub notify_on_drift: bool,
}

impl Default for DriftDetectionInput {
    fn default() -> Self {
        Self {
            rule_ids: vec![],
            notify_on_drift: true,
        }
    }
}

/// Drift severity ladder, worst first when comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDriftResult {
    pub rule_id: String,
    pub has_drift: bool,
    pub drift_types: Vec<String>,
    pub details: Vec<String>,
    pub severity: DriftSeverity,
    pub last_verified: Option<DateTime<Utc>>,
    pub current_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetectionOutput {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rules_checked: usize,
    pub rules_with_drift: usize,
    pub drift_results: Vec<RuleDriftResult>,
    pub notifications_sent: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetectionProgress {
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    pub total_rules: usize,
    pub checked_rules: usize,
    pub drift_detected: usize,
}
