//! Tier 0: structural validation.
//!
//! Six deterministic checks over the rule record itself. No source text and
//! no corpus involvement; this tier gates everything above it.

use std::sync::OnceLock;

use regex::Regex;
use veritier_core::{ConsistencyEvidence, EvidenceLabel, Rule};

const TIER: u8 = 0;

/// Rule ids are dotted lowercase paths, e.g. `eu.mica.art36`.
const ID_PATTERN: &str = r"^[a-z0-9][a-z0-9._-]*$";

fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ID_PATTERN).expect("rule id regex"))
}

/// Structural validation checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralChecker;

impl StructuralChecker {
    pub fn new() -> Self {
        Self
    }

    /// Run all six structural checks, in a fixed order.
    pub fn check(&self, rule: &Rule) -> Vec<ConsistencyEvidence> {
        vec![
            self.check_required_fields(rule),
            self.check_id_format(rule),
            self.check_source_exists(rule),
            self.check_date_consistency(rule),
            self.check_decision_tree(rule),
            self.check_schema(rule),
        ]
    }

    fn check_required_fields(&self, rule: &Rule) -> ConsistencyEvidence {
        let mut missing = Vec::new();
        if rule.rule_id.trim().is_empty() {
            missing.push("rule_id");
        }
        if rule.description.trim().is_empty() {
            missing.push("description");
        }
        if rule.decision_tree.is_none() {
            missing.push("decision_tree");
        }
        if missing.is_empty() {
            ConsistencyEvidence::new(
                TIER,
                "required_fields",
                EvidenceLabel::Pass,
                1.0,
                "all required fields present",
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                "required_fields",
                EvidenceLabel::Fail,
                0.0,
                format!("missing required fields: {}", missing.join(", ")),
            )
        }
    }

    fn check_id_format(&self, rule: &Rule) -> ConsistencyEvidence {
        if id_regex().is_match(&rule.rule_id) {
            ConsistencyEvidence::new(
                TIER,
                "id_format",
                EvidenceLabel::Pass,
                1.0,
                "rule id is well formed",
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                "id_format",
                EvidenceLabel::Fail,
                0.0,
                format!("rule id {:?} does not match {ID_PATTERN}", rule.rule_id),
            )
            .with_rule_element("rule_id")
        }
    }

    /// Missing source is a warning, not a failure: it marks the rule as
    /// untraceable to legal text, which drift detection reports as
    /// reference drift.
    fn check_source_exists(&self, rule: &Rule) -> ConsistencyEvidence {
        match &rule.source {
            Some(source) if !source.document_id.trim().is_empty() => ConsistencyEvidence::new(
                TIER,
                "source_exists",
                EvidenceLabel::Pass,
                1.0,
                format!("source document {}", source.document_id),
            ),
            Some(_) => ConsistencyEvidence::new(
                TIER,
                "source_exists",
                EvidenceLabel::Warning,
                0.5,
                "source reference has an empty document id",
            )
            .with_rule_element("source"),
            None => ConsistencyEvidence::new(
                TIER,
                "source_exists",
                EvidenceLabel::Warning,
                0.5,
                "rule has no source reference",
            )
            .with_rule_element("source"),
        }
    }

    fn check_date_consistency(&self, rule: &Rule) -> ConsistencyEvidence {
        match (rule.effective_from, rule.effective_to) {
            (Some(from), Some(to)) if from > to => ConsistencyEvidence::new(
                TIER,
                "date_consistency",
                EvidenceLabel::Fail,
                0.0,
                format!("effective_from {from} is after effective_to {to}"),
            )
            .with_rule_element("effective_from"),
            _ => ConsistencyEvidence::new(
                TIER,
                "date_consistency",
                EvidenceLabel::Pass,
                1.0,
                "validity window is ordered",
            ),
        }
    }

    fn check_decision_tree(&self, rule: &Rule) -> ConsistencyEvidence {
        let Some(tree) = &rule.decision_tree else {
            return ConsistencyEvidence::new(
                TIER,
                "decision_tree_valid",
                EvidenceLabel::Fail,
                0.0,
                "rule has no decision tree",
            )
            .with_rule_element("decision_tree");
        };

        let empty_leaves = tree
            .leaf_results()
            .iter()
            .filter(|r| r.trim().is_empty())
            .count();
        if empty_leaves > 0 {
            return ConsistencyEvidence::new(
                TIER,
                "decision_tree_valid",
                EvidenceLabel::Fail,
                0.0,
                format!("{empty_leaves} decision leaf(s) carry an empty result"),
            )
            .with_rule_element("decision_tree");
        }
        if tree.has_dead_end() {
            return ConsistencyEvidence::new(
                TIER,
                "decision_tree_valid",
                EvidenceLabel::Warning,
                0.5,
                "decision node with no branches (dead end)",
            )
            .with_rule_element("decision_tree");
        }
        ConsistencyEvidence::new(
            TIER,
            "decision_tree_valid",
            EvidenceLabel::Pass,
            1.0,
            format!("{} outcome(s) across the tree", tree.outcomes().len()),
        )
    }

    fn check_schema(&self, rule: &Rule) -> ConsistencyEvidence {
        if let Some(applies_if) = &rule.applies_if {
            if applies_if.has_empty_group() {
                return ConsistencyEvidence::new(
                    TIER,
                    "schema_valid",
                    EvidenceLabel::Warning,
                    0.5,
                    "applies_if contains an empty condition group",
                )
                .with_rule_element("applies_if");
            }
        }
        ConsistencyEvidence::new(
            TIER,
            "schema_valid",
            EvidenceLabel::Pass,
            1.0,
            "rule structure is well formed",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veritier_core::{Condition, DecisionTree};

    fn valid_rule() -> Rule {
        Rule {
            rule_id: "eu.mica.art36".into(),
            description: "Public offering of asset-referenced tokens requires authorization."
                .into(),
            interpretation_notes: None,
            jurisdiction: Some("EU".into()),
            applies_if: Some(Condition::Leaf {
                field: "instrument_type".into(),
                operator: "==".into(),
                value: json!("art"),
            }),
            decision_tree: Some(DecisionTree::Node {
                condition: Condition::Leaf {
                    field: "authorized".into(),
                    operator: "==".into(),
                    value: json!(true),
                },
                true_branch: Some(Box::new(DecisionTree::Leaf {
                    result: "permitted".into(),
                })),
                false_branch: Some(Box::new(DecisionTree::Leaf {
                    result: "prohibited".into(),
                })),
            }),
            effective_from: chrono::NaiveDate::from_ymd_opt(2024, 6, 30),
            effective_to: None,
            source: Some(veritier_core::SourceRef {
                document_id: "MiCA-2023".into(),
                article: Some("Art. 36".into()),
            }),
            tags: vec!["art".into()],
            last_verified: None,
        }
    }

    fn find<'a>(evidence: &'a [ConsistencyEvidence], category: &str) -> &'a ConsistencyEvidence {
        evidence
            .iter()
            .find(|e| e.category == category)
            .unwrap_or_else(|| panic!("no {category} evidence"))
    }

    #[test]
    fn valid_rule_passes_all_six() {
        let evidence = StructuralChecker::new().check(&valid_rule());
        assert_eq!(evidence.len(), 6);
        assert!(evidence.iter().all(|e| e.label == EvidenceLabel::Pass));
        assert!(evidence.iter().all(|e| e.tier == 0));
    }

    #[test]
    fn uppercase_id_fails_format() {
        let mut rule = valid_rule();
        rule.rule_id = "EU.MiCA.Art36".into();
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(find(&evidence, "id_format").label, EvidenceLabel::Fail);
    }

    #[test]
    fn missing_source_is_warning_not_failure() {
        let mut rule = valid_rule();
        rule.source = None;
        let evidence = StructuralChecker::new().check(&rule);
        let source = find(&evidence, "source_exists");
        assert_eq!(source.label, EvidenceLabel::Warning);
        assert_eq!(source.score, 0.5);
    }

    #[test]
    fn inverted_dates_fail() {
        let mut rule = valid_rule();
        rule.effective_from = chrono::NaiveDate::from_ymd_opt(2025, 1, 1);
        rule.effective_to = chrono::NaiveDate::from_ymd_opt(2024, 1, 1);
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(
            find(&evidence, "date_consistency").label,
            EvidenceLabel::Fail
        );
    }

    #[test]
    fn empty_leaf_result_fails_tree_check() {
        let mut rule = valid_rule();
        rule.decision_tree = Some(DecisionTree::Leaf { result: "  ".into() });
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(
            find(&evidence, "decision_tree_valid").label,
            EvidenceLabel::Fail
        );
    }

    #[test]
    fn dead_end_node_warns() {
        let mut rule = valid_rule();
        rule.decision_tree = Some(DecisionTree::Node {
            condition: Condition::Leaf {
                field: "authorized".into(),
                operator: "==".into(),
                value: json!(true),
            },
            true_branch: None,
            false_branch: None,
        });
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(
            find(&evidence, "decision_tree_valid").label,
            EvidenceLabel::Warning
        );
    }

    #[test]
    fn empty_condition_group_warns_on_schema() {
        let mut rule = valid_rule();
        rule.applies_if = Some(Condition::Group {
            all: vec![],
            any: vec![],
        });
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(find(&evidence, "schema_valid").label, EvidenceLabel::Warning);
    }

    #[test]
    fn missing_tree_fails_required_fields_and_tree_check() {
        let mut rule = valid_rule();
        rule.decision_tree = None;
        let evidence = StructuralChecker::new().check(&rule);
        assert_eq!(find(&evidence, "required_fields").label, EvidenceLabel::Fail);
        assert_eq!(
            find(&evidence, "decision_tree_valid").label,
            EvidenceLabel::Fail
        );
    }
}
