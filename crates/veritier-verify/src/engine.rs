//! The consistency engine: runs the requested verification tiers over a
//! rule and folds their evidence into one report.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use veritier_core::{ConsistencyEvidence, Rule, VerificationReport};

use crate::cross_rule::CrossRuleChecker;
use crate::nli::EntailmentClassifier;
use crate::similarity::SimilarityScorer;
use crate::tier0::StructuralChecker;
use crate::tier1::LexicalChecker;
use crate::tier2::SemanticChecker;
use crate::tier3::EntailmentChecker;

/// The five verification tiers, ordered by depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationTier {
    Structural,
    Lexical,
    Semantic,
    Entailment,
    CrossRule,
}

impl VerificationTier {
    pub const ALL: [VerificationTier; 5] = [
        Self::Structural,
        Self::Lexical,
        Self::Semantic,
        Self::Entailment,
        Self::CrossRule,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Self::Structural => 0,
            Self::Lexical => 1,
            Self::Semantic => 2,
            Self::Entailment => 3,
            Self::CrossRule => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.number() == n)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Entailment => "entailment",
            Self::CrossRule => "cross_rule",
        }
    }
}

impl std::fmt::Display for VerificationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (tier {})", self.name(), self.number())
    }
}

/// Runs tier checkers over rules. Cheap to clone; the scorer and classifier
/// share their backends through `Arc`.
#[derive(Clone, Default)]
pub struct ConsistencyEngine {
    structural: StructuralChecker,
    lexical: LexicalChecker,
    semantic: SemanticChecker,
    entailment: EntailmentChecker,
}

impl ConsistencyEngine {
    pub fn new(scorer: SimilarityScorer, classifier: EntailmentClassifier) -> Self {
        Self {
            structural: StructuralChecker::new(),
            lexical: LexicalChecker::new(),
            semantic: SemanticChecker::new(scorer),
            entailment: EntailmentChecker::new(classifier),
        }
    }

    /// Engine with no ML backends, heuristics everywhere.
    pub fn heuristic() -> Self {
        Self::new(SimilarityScorer::heuristic(), EntailmentClassifier::heuristic())
    }

    /// Run a single tier and return its evidence.
    pub fn run_tier(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
        tier: VerificationTier,
        related_rules: &[Rule],
    ) -> Vec<ConsistencyEvidence> {
        debug!(rule_id = %rule.rule_id, tier = %tier, "running verification tier");
        match tier {
            VerificationTier::Structural => self.structural.check(rule),
            VerificationTier::Lexical => self.lexical.check(rule, source_text),
            VerificationTier::Semantic => self.semantic.check(rule, source_text),
            VerificationTier::Entailment => self.entailment.check(rule, source_text),
            VerificationTier::CrossRule => {
                CrossRuleChecker::new(related_rules.to_vec()).check(rule)
            }
        }
    }

    /// Run the requested tiers in ascending order and fold the evidence into
    /// a report. Duplicate tier requests are collapsed.
    pub fn verify_rule(
        &self,
        rule: &Rule,
        source_text: Option<&str>,
        tiers: &[VerificationTier],
        related_rules: &[Rule],
    ) -> VerificationReport {
        let mut ordered: Vec<VerificationTier> = tiers.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut evidence = Vec::new();
        for tier in &ordered {
            evidence.extend(self.run_tier(rule, source_text, *tier, related_rules));
        }
        let report = VerificationReport::from_evidence(&rule.rule_id, evidence);
        info!(
            rule_id = %rule.rule_id,
            tiers = ordered.len(),
            status = report.summary.status.as_str(),
            checks_run = report.summary.checks_run,
            checks_passed = report.summary.checks_passed,
            "verification complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use veritier_core::{Condition, ConsistencyStatus, DecisionTree, EvidenceLabel, SourceRef};

    fn sample_rule() -> Rule {
        Rule {
            rule_id: "eu.mica.art36".into(),
            description: "Issuers of asset-referenced tokens must publish a whitepaper.".into(),
            interpretation_notes: None,
            jurisdiction: Some("EU".into()),
            applies_if: Some(Condition::Leaf {
                field: "instrument_type".into(),
                operator: "==".into(),
                value: json!("art"),
            }),
            decision_tree: Some(DecisionTree::Node {
                condition: Condition::Leaf {
                    field: "whitepaper_published".into(),
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
            effective_from: None,
            effective_to: None,
            source: Some(SourceRef {
                document_id: "MiCA-2023".into(),
                article: Some("Art. 36".into()),
            }),
            tags: vec![],
            last_verified: None,
        }
    }

    #[test]
    fn tier_numbers_round_trip() {
        for tier in VerificationTier::ALL {
            assert_eq!(VerificationTier::from_number(tier.number()), Some(tier));
        }
        assert_eq!(VerificationTier::from_number(5), None);
    }

    #[test]
    fn all_tiers_yield_twenty_checks() {
        // 6 structural + 6 lexical + 3 semantic + 2 entailment + 3 cross-rule
        let engine = ConsistencyEngine::heuristic();
        let report = engine.verify_rule(&sample_rule(), None, &VerificationTier::ALL, &[]);
        assert_eq!(report.summary.checks_run, 20);
    }

    #[test]
    fn evidence_arrives_in_ascending_tier_order() {
        let engine = ConsistencyEngine::heuristic();
        // Request out of order; the engine sorts.
        let tiers = [
            VerificationTier::CrossRule,
            VerificationTier::Structural,
            VerificationTier::Semantic,
        ];
        let report = engine.verify_rule(&sample_rule(), None, &tiers, &[]);
        let tier_sequence: Vec<u8> = report.evidence.iter().map(|e| e.tier).collect();
        let mut sorted = tier_sequence.clone();
        sorted.sort();
        assert_eq!(tier_sequence, sorted);
        assert_eq!(report.summary.checks_run, 6 + 3 + 3);
    }

    #[test]
    fn duplicate_tier_requests_collapse() {
        let engine = ConsistencyEngine::heuristic();
        let tiers = [VerificationTier::Structural, VerificationTier::Structural];
        let report = engine.verify_rule(&sample_rule(), None, &tiers, &[]);
        assert_eq!(report.summary.checks_run, 6);
    }

    #[test]
    fn clean_rule_with_source_is_consistent() {
        let engine = ConsistencyEngine::heuristic();
        let source = "Issuers of asset-referenced tokens must publish a whitepaper \
                      before offering such tokens to the public.";
        let report = engine.verify_rule(&sample_rule(), Some(source), &VerificationTier::ALL, &[]);
        assert_eq!(report.summary.status, ConsistencyStatus::Consistent);
    }

    #[test]
    fn contradicting_neighbor_makes_report_inconsistent() {
        let engine = ConsistencyEngine::heuristic();
        let rule = sample_rule();
        let mut other = sample_rule();
        other.rule_id = "eu.mica.art37".into();
        other.decision_tree = Some(DecisionTree::Leaf {
            result: "prohibited".into(),
        });
        let report = engine.verify_rule(
            &rule,
            None,
            &[VerificationTier::CrossRule],
            std::slice::from_ref(&other),
        );
        assert_eq!(report.summary.status, ConsistencyStatus::Inconsistent);
        assert!(report
            .evidence
            .iter()
            .any(|e| e.category == "no_contradiction" && e.label == EvidenceLabel::Fail));
    }
}
