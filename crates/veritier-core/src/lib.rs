//! Core types for Veritier: the rule data model, consistency evidence
//! records, and the rule store boundary.

pub mod evidence;
pub mod rule;
pub mod scenario;
pub mod store;

pub use evidence::{
    ConsistencyEvidence, ConsistencyStatus, EvidenceLabel, VerificationReport,
    VerificationSummary,
};
pub use rule::{Condition, DecisionTree, Rule, SourceRef};
pub use scenario::{EvaluationOutcome, Obligation, ScenarioFacts, TraceStep};
pub use store::{InMemoryRuleStore, RuleStore, StoreError};

/// Current UTC timestamp as an ISO-8601 string with `Z` suffix.
///
/// All evidence records and workflow outputs use this format.
pub fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::utc_timestamp;

    #[test]
    fn timestamp_has_z_suffix() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'), "expected Z suffix, got {ts}");
        assert!(ts.contains('T'));
    }
}
