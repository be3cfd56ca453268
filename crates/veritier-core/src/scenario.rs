//! Scenario evaluation boundary types.
//!
//! The decision-tree evaluator itself is an external collaborator; these are
//! the records that cross its interface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Facts describing a scenario under evaluation, keyed by field name.
pub type ScenarioFacts = BTreeMap<String, serde_json::Value>;

/// An obligation attached to a decision outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// One step of a decision-tree traversal trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub node: String,
    pub condition: String,
    pub result: bool,
}

/// Result of evaluating one rule against a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    #[serde(default)]
    pub decision: Option<String>,
    pub applicable: bool,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default)]
    pub trace: Vec<TraceStep>,
}

/// Merge baseline facts with scenario overrides; overrides win on collision.
pub fn merge_facts(baseline: &ScenarioFacts, overrides: &ScenarioFacts) -> ScenarioFacts {
    let mut merged = baseline.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
