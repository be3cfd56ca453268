//! Tier 3: entailment between source text and the rule's encoded claims.
//!
//! Two evidence items per run. The entailment check asks whether the source
//! text entails the claims the rule makes (derived from its description,
//! decision outcomes, and notes). The completeness check asks the reverse:
//! whether each deontic clause of the source is covered by the rule.

use veritier_core::{ConsistencyEvidence, EvidenceLabel, Rule};

use crate::nli::{EntailmentClassifier, NliLabel};
use crate::text::{deontic_sentences, split_sentences};

const TIER: u8 = 3;

/// Canonical claim phrasing per decision-outcome keyword. Matched by
/// substring containment, so composite outcomes like
/// `permitted_with_conditions` still map. `non_compliant` must precede
/// `compliant` or the shorter key would shadow it.
const OUTCOME_CLAIMS: &[(&str, &str)] = &[
    (
        "non_compliant",
        "This arrangement is not compliant with the regulation.",
    ),
    ("permitted", "This activity is permitted under the regulation."),
    ("prohibited", "This activity is prohibited under the regulation."),
    ("required", "This action is required under the regulation."),
    ("forbidden", "This action is forbidden under the regulation."),
    ("authorized", "This activity is authorized under the regulation."),
    ("denied", "Authorization is denied under the regulation."),
    ("compliant", "This arrangement is compliant with the regulation."),
    ("exempt", "This activity is exempt from the regulation."),
    ("subject_to", "This activity is subject to the regulation."),
    ("allowed", "This activity is allowed under the regulation."),
];

/// Entailment checker.
#[derive(Clone, Default)]
pub struct EntailmentChecker {
    classifier: EntailmentClassifier,
}

impl EntailmentChecker {
    pub fn new(classifier: EntailmentClassifier) -> Self {
        Self { classifier }
    }

    /// Run the two entailment checks against the legal source text.
    pub fn check(&self, rule: &Rule, source_text: Option<&str>) -> Vec<ConsistencyEvidence> {
        let Some(source) = source_text.filter(|s| !s.trim().is_empty()) else {
            return vec![
                ConsistencyEvidence::new(
                    TIER,
                    "entailment",
                    EvidenceLabel::Warning,
                    0.5,
                    "no source text available for entailment checking",
                ),
                ConsistencyEvidence::new(
                    TIER,
                    "completeness",
                    EvidenceLabel::Warning,
                    0.5,
                    "no source text available for completeness checking",
                ),
            ];
        };
        vec![
            self.check_entailment(rule, source),
            self.check_completeness(rule, source),
        ]
    }

    /// Does the source entail what the rule claims?
    fn check_entailment(&self, rule: &Rule, source: &str) -> ConsistencyEvidence {
        let hypotheses = extract_hypotheses(rule);
        if hypotheses.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "entailment",
                EvidenceLabel::Warning,
                0.5,
                "rule yields no checkable claims",
            );
        }
        let results: Vec<_> = hypotheses
            .iter()
            .map(|h| self.classifier.classify(source, h))
            .collect();
        let verdict = self.classifier.aggregate(&results);

        let (label, score) = match verdict.label {
            NliLabel::Entailment => (EvidenceLabel::Pass, verdict.confidence),
            NliLabel::Contradiction => (EvidenceLabel::Fail, 1.0 - verdict.confidence),
            NliLabel::Neutral => (EvidenceLabel::Warning, 0.5),
        };
        ConsistencyEvidence::new(
            TIER,
            "entailment",
            label,
            score,
            format!(
                "NLI ({}): {} (confidence: {:.2})",
                verdict.mode,
                verdict.label.as_str(),
                verdict.confidence
            ),
        )
    }

    /// Does the rule cover everything the source obliges? A source clause
    /// counts as covered when the rule's prose entails it or at least does
    /// not contradict it.
    fn check_completeness(&self, rule: &Rule, source: &str) -> ConsistencyEvidence {
        let clauses = deontic_sentences(source);
        if clauses.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "completeness",
                EvidenceLabel::Pass,
                0.9,
                "source text states no deontic clauses to cover",
            );
        }
        let rule_text = full_rule_text(rule);
        let covered = clauses
            .iter()
            .filter(|clause| {
                let result = self.classifier.classify(&rule_text, clause);
                matches!(result.label, NliLabel::Entailment | NliLabel::Neutral)
            })
            .count();
        let ratio = covered as f64 / clauses.len() as f64;
        let label = if ratio >= 0.8 {
            EvidenceLabel::Pass
        } else if ratio >= 0.5 {
            EvidenceLabel::Warning
        } else {
            EvidenceLabel::Fail
        };
        ConsistencyEvidence::new(
            TIER,
            "completeness",
            label,
            ratio,
            format!("{covered}/{} source clause(s) covered by the rule", clauses.len()),
        )
    }
}

/// The claims a rule makes, as natural-language hypotheses.
///
/// Drawn from the description, a canonical phrasing per decision outcome,
/// raw outcome strings long enough to stand alone, and the first two
/// sentences of the interpretation notes.
fn extract_hypotheses(rule: &Rule) -> Vec<String> {
    let mut hypotheses = Vec::new();
    if !rule.description.trim().is_empty() {
        hypotheses.push(rule.description.clone());
    }
    for outcome in rule.outcomes() {
        if let Some((_, claim)) = OUTCOME_CLAIMS.iter().find(|(key, _)| outcome.contains(key)) {
            if !hypotheses.iter().any(|h| h == claim) {
                hypotheses.push((*claim).to_string());
            }
        } else if outcome.len() > 10 {
            hypotheses.push(outcome);
        }
    }
    if let Some(notes) = &rule.interpretation_notes {
        for sentence in split_sentences(notes).into_iter().take(2) {
            if sentence.len() > 10 {
                hypotheses.push(sentence);
            }
        }
    }
    hypotheses
}

/// Premise text for completeness: description, decision outcomes, and up
/// to 500 characters of the interpretation notes.
fn full_rule_text(rule: &Rule) -> String {
    let mut parts = vec![rule.description.clone()];
    if let Some(tree) = &rule.decision_tree {
        parts.extend(tree.leaf_results().into_iter().map(str::to_owned));
    }
    if let Some(notes) = &rule.interpretation_notes {
        if !notes.trim().is_empty() {
            parts.push(notes.chars().take(500).collect());
        }
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veritier_core::{Condition, DecisionTree};

    fn checker() -> EntailmentChecker {
        EntailmentChecker::new(EntailmentClassifier::heuristic())
    }

    fn rule(description: &str, tree: Option<DecisionTree>) -> Rule {
        Rule {
            rule_id: "eu.mica.art36".into(),
            description: description.into(),
            interpretation_notes: None,
            jurisdiction: Some("EU".into()),
            applies_if: None,
            decision_tree: tree,
            effective_from: None,
            effective_to: None,
            source: None,
            tags: vec![],
            last_verified: None,
        }
    }

    fn binary_tree(true_result: &str, false_result: &str) -> DecisionTree {
        DecisionTree::Node {
            condition: Condition::Leaf {
                field: "authorized".into(),
                operator: "==".into(),
                value: json!(true),
            },
            true_branch: Some(Box::new(DecisionTree::Leaf {
                result: true_result.into(),
            })),
            false_branch: Some(Box::new(DecisionTree::Leaf {
                result: false_result.into(),
            })),
        }
    }

    #[test]
    fn produces_exactly_two_evidence_items() {
        let rule = rule("Issuers must publish a whitepaper.", None);
        let evidence = checker().check(&rule, Some("Issuers must publish a whitepaper."));
        assert_eq!(evidence.len(), 2);
        assert!(evidence.iter().all(|e| e.tier == 3));
        assert_eq!(evidence[0].category, "entailment");
        assert_eq!(evidence[1].category, "completeness");
    }

    #[test]
    fn missing_source_warns_both_checks() {
        let rule = rule("Issuers must publish a whitepaper.", None);
        let evidence = checker().check(&rule, None);
        for e in &evidence {
            assert_eq!(e.label, EvidenceLabel::Warning);
            assert_eq!(e.score, 0.5);
        }
    }

    #[test]
    fn negated_rule_description_contradicts_source() {
        let rule = rule("The issuer is not authorized to offer tokens.", None);
        let evidence = checker().check(&rule, Some("The issuer is authorized to offer tokens."));
        let entailment = &evidence[0];
        assert_eq!(entailment.label, EvidenceLabel::Fail);
        assert!(entailment.details.contains("contradiction"));
    }

    #[test]
    fn matching_description_entails() {
        let rule = rule("issuers must publish whitepaper before offering", None);
        let source = "All issuers must publish their whitepaper well before any offering begins.";
        let evidence = checker().check(&rule, Some(source));
        let entailment = &evidence[0];
        assert_eq!(entailment.label, EvidenceLabel::Pass);
        assert!(entailment.details.starts_with("NLI (heuristic)"));
    }

    #[test]
    fn outcomes_map_to_canonical_claims() {
        let rule = rule(
            "Offering depends on authorization.",
            Some(binary_tree("permitted", "prohibited")),
        );
        let hypotheses = extract_hypotheses(&rule);
        assert!(hypotheses
            .iter()
            .any(|h| h == "This activity is permitted under the regulation."));
        assert!(hypotheses
            .iter()
            .any(|h| h == "This activity is prohibited under the regulation."));
    }

    #[test]
    fn composite_outcomes_map_by_containment() {
        let rule = rule(
            "Offering depends on authorization.",
            Some(binary_tree("permitted_with_conditions", "prohibited")),
        );
        let hypotheses = extract_hypotheses(&rule);
        assert!(hypotheses
            .iter()
            .any(|h| h == "This activity is permitted under the regulation."));
        assert!(!hypotheses
            .iter()
            .any(|h| h == "permitted_with_conditions"));
    }

    #[test]
    fn non_compliant_outcome_is_not_shadowed() {
        let rule = rule(
            "Compliance depends on authorization.",
            Some(binary_tree("compliant", "non_compliant")),
        );
        let hypotheses = extract_hypotheses(&rule);
        assert!(hypotheses
            .iter()
            .any(|h| h == "This arrangement is compliant with the regulation."));
        assert!(hypotheses
            .iter()
            .any(|h| h == "This arrangement is not compliant with the regulation."));
    }

    #[test]
    fn long_unmapped_outcomes_used_verbatim() {
        let rule = rule(
            "Offering depends on authorization.",
            Some(binary_tree("notification to the authority is needed", "ok")),
        );
        let hypotheses = extract_hypotheses(&rule);
        assert!(hypotheses
            .iter()
            .any(|h| h == "notification to the authority is needed"));
        // Short unmapped outcome is dropped.
        assert!(!hypotheses.iter().any(|h| h == "ok"));
    }

    #[test]
    fn completeness_premise_includes_decision_outcomes() {
        let mut rule = rule(
            "Offering depends on authorization.",
            Some(binary_tree("must notify the authority", "ok")),
        );
        rule.interpretation_notes = Some("x".repeat(600));
        let text = full_rule_text(&rule);
        assert!(text.contains("must notify the authority"));
        assert!(!text.contains(&"x".repeat(501)));
        assert!(text.contains(&"x".repeat(500)));
    }

    #[test]
    fn deontic_free_source_is_trivially_complete() {
        let rule = rule("Issuers must publish a whitepaper.", None);
        let evidence = checker().check(&rule, Some("This chapter defines terms."));
        let completeness = &evidence[1];
        assert_eq!(completeness.label, EvidenceLabel::Pass);
        assert_eq!(completeness.score, 0.9);
    }
}
