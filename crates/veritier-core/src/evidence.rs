//! Consistency evidence records: the atomic output of a single verification
//! check, and the aggregated per-run summary.

use serde::{Deserialize, Serialize};

use crate::utc_timestamp;

/// Outcome label of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceLabel {
    Pass,
    Warning,
    Fail,
}

impl EvidenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warning => "warning",
            Self::Fail => "fail",
        }
    }
}

/// One check's output. Created fresh per invocation and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyEvidence {
    /// Verification tier (0-4) the check belongs to.
    pub tier: u8,
    /// Check name, e.g. `semantic_alignment` or `no_contradiction`.
    pub category: String,
    pub label: EvidenceLabel,
    /// Check score in [0, 1].
    pub score: f64,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_element: Option<String>,
    /// ISO-8601 UTC timestamp with `Z` suffix.
    pub timestamp: String,
}

impl ConsistencyEvidence {
    /// Build an evidence record stamped with the current time.
    pub fn new(
        tier: u8,
        category: impl Into<String>,
        label: EvidenceLabel,
        score: f64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            category: category.into(),
            label,
            score: score.clamp(0.0, 1.0),
            details: details.into(),
            source_span: None,
            rule_element: None,
            timestamp: utc_timestamp(),
        }
    }

    pub fn with_source_span(mut self, span: impl Into<String>) -> Self {
        self.source_span = Some(span.into());
        self
    }

    pub fn with_rule_element(mut self, element: impl Into<String>) -> Self {
        self.rule_element = Some(element.into());
        self
    }
}

/// Overall verdict derived from a verification run's evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
}

impl ConsistencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Inconsistent => "inconsistent",
        }
    }
}

/// Aggregated summary over a verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub status: ConsistencyStatus,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub last_verified: String,
}

/// Output of a full engine pass: concatenated tier evidence plus summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub rule_id: String,
    pub evidence: Vec<ConsistencyEvidence>,
    pub summary: VerificationSummary,
}

impl VerificationReport {
    /// Derive a report from collected evidence. Any `fail`-labelled item
    /// anywhere in the run makes the overall status `inconsistent`.
    pub fn from_evidence(rule_id: impl Into<String>, evidence: Vec<ConsistencyEvidence>) -> Self {
        let checks_run = evidence.len();
        let checks_passed = evidence
            .iter()
            .filter(|e| e.label == EvidenceLabel::Pass)
            .count();
        let status = if evidence.iter().any(|e| e.label == EvidenceLabel::Fail) {
            ConsistencyStatus::Inconsistent
        } else {
            ConsistencyStatus::Consistent
        };
        Self {
            rule_id: rule_id.into(),
            evidence,
            summary: VerificationSummary {
                status,
                checks_run,
                checks_passed,
                last_verified: utc_timestamp(),
            },
        }
    }

    /// Mean evidence score, 0 when the run produced no evidence.
    pub fn mean_score(&self) -> f64 {
        if self.evidence.is_empty() {
            return 0.0;
        }
        self.evidence.iter().map(|e| e.score).sum::<f64>() / self.evidence.len() as f64
    }
}
