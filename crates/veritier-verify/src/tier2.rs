//! Tier 2: semantic similarity between rule encoding and source text.
//!
//! Exactly three evidence items per run: whole-text alignment, obligation
//! matching, and condition grounding. Scoring goes through the dual-mode
//! `SimilarityScorer`, so an available embedding model upgrades this tier
//! transparently.

use std::sync::OnceLock;

use regex::Regex;
use veritier_core::{ConsistencyEvidence, EvidenceLabel, Rule};

use crate::similarity::{SimilarityLabel, SimilarityScorer};
use crate::text::deontic_sentences;

const TIER: u8 = 2;

/// Obligation-bearing modals; narrower than the full deontic set because
/// permissions are not obligations.
const OBLIGATION_PATTERN: &str = r"(?i)\b(shall|must|required|obliged)\b";

fn obligation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(OBLIGATION_PATTERN).expect("obligation regex"))
}

/// Minimum similarity for a condition to count as grounded in the source.
const GROUNDING_THRESHOLD: f64 = 0.50;

/// Semantic alignment checker.
#[derive(Clone, Default)]
pub struct SemanticChecker {
    scorer: SimilarityScorer,
}

impl SemanticChecker {
    pub fn new(scorer: SimilarityScorer) -> Self {
        Self { scorer }
    }

    /// Run the three semantic checks against the legal source text.
    pub fn check(&self, rule: &Rule, source_text: Option<&str>) -> Vec<ConsistencyEvidence> {
        let source = source_text.filter(|s| !s.trim().is_empty());
        vec![
            self.check_semantic_alignment(rule, source),
            self.check_obligation_similarity(rule, source),
            self.check_condition_grounding(rule, source),
        ]
    }

    fn check_semantic_alignment(
        &self,
        rule: &Rule,
        source: Option<&str>,
    ) -> ConsistencyEvidence {
        let rule_text = rule_prose(rule);
        let (Some(source), false) = (source, rule_text.trim().is_empty()) else {
            return ConsistencyEvidence::new(
                TIER,
                "semantic_alignment",
                EvidenceLabel::Warning,
                0.5,
                "no source text or rule description to compare",
            );
        };
        let similarity = self.scorer.score(&rule_text, source);
        let label = match similarity.label {
            SimilarityLabel::High => EvidenceLabel::Pass,
            SimilarityLabel::Medium => EvidenceLabel::Warning,
            SimilarityLabel::Low => EvidenceLabel::Fail,
        };
        ConsistencyEvidence::new(
            TIER,
            "semantic_alignment",
            label,
            similarity.score,
            similarity.details,
        )
    }

    /// Compare the rule's obligations (decision outcomes plus an
    /// obligation-bearing description) against the source's deontic
    /// sentences as one combined text pair.
    fn check_obligation_similarity(
        &self,
        rule: &Rule,
        source: Option<&str>,
    ) -> ConsistencyEvidence {
        let Some(source) = source else {
            return ConsistencyEvidence::new(
                TIER,
                "obligation_similarity",
                EvidenceLabel::Warning,
                0.5,
                "no source text to match obligations against",
            );
        };
        let source_obligations = deontic_sentences(source);
        if source_obligations.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "obligation_similarity",
                EvidenceLabel::Pass,
                0.9,
                "source text states no deontic obligations",
            );
        }
        let rule_obligations = rule_obligations(rule);
        if rule_obligations.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "obligation_similarity",
                EvidenceLabel::Warning,
                0.5,
                format!(
                    "source states {} obligation(s) but the rule encodes none",
                    source_obligations.len()
                ),
            );
        }

        let rule_combined = rule_obligations.join(" ");
        let source_combined = source_obligations.join(" ");
        let similarity = self.scorer.score(&rule_combined, &source_combined);
        let label = match similarity.label {
            SimilarityLabel::High => EvidenceLabel::Pass,
            SimilarityLabel::Medium => EvidenceLabel::Warning,
            SimilarityLabel::Low => EvidenceLabel::Fail,
        };
        ConsistencyEvidence::new(
            TIER,
            "obligation_similarity",
            label,
            similarity.score,
            format!("obligation match: {}", similarity.details),
        )
        .with_rule_element("decision_tree.obligations")
    }

    /// Each encoded condition must resemble something the source actually
    /// says. A rule with no conditions is trivially grounded.
    fn check_condition_grounding(
        &self,
        rule: &Rule,
        source: Option<&str>,
    ) -> ConsistencyEvidence {
        let conditions = rule.condition_texts();
        if conditions.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "condition_grounding",
                EvidenceLabel::Pass,
                1.0,
                "rule encodes no conditions",
            );
        }
        let Some(source) = source else {
            return ConsistencyEvidence::new(
                TIER,
                "condition_grounding",
                EvidenceLabel::Warning,
                0.5,
                "no source text to ground conditions in",
            );
        };
        let mut grounded = 0usize;
        let mut ungrounded = Vec::new();
        for condition in &conditions {
            if self.scorer.score(condition, source).score >= GROUNDING_THRESHOLD {
                grounded += 1;
            } else {
                ungrounded.push(condition.clone());
            }
        }
        let ratio = grounded as f64 / conditions.len() as f64;
        let label = if ratio >= 0.8 {
            EvidenceLabel::Pass
        } else if ratio >= 0.5 {
            EvidenceLabel::Warning
        } else {
            EvidenceLabel::Fail
        };
        let details = if ungrounded.is_empty() {
            format!("all {} condition(s) grounded in source text", conditions.len())
        } else {
            let sample = ungrounded
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "{grounded}/{} condition(s) grounded; ungrounded: {sample}",
                conditions.len()
            )
        };
        ConsistencyEvidence::new(TIER, "condition_grounding", label, ratio, details)
            .with_rule_element("applies_if")
    }
}

/// Prose rendering of the rule: description, decision outcomes, then notes.
fn rule_prose(rule: &Rule) -> String {
    let mut parts = vec![rule.description.clone()];
    if let Some(tree) = &rule.decision_tree {
        parts.extend(tree.leaf_results().into_iter().map(str::to_owned));
    }
    if let Some(notes) = &rule.interpretation_notes {
        if !notes.trim().is_empty() {
            parts.push(notes.clone());
        }
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join(" ")
}

/// The obligations a rule encodes: its decision outcomes, plus the
/// description when it carries an obligation-bearing modal.
fn rule_obligations(rule: &Rule) -> Vec<String> {
    let mut obligations: Vec<String> = rule
        .decision_tree
        .as_ref()
        .map(|tree| tree.leaf_results().into_iter().map(str::to_owned).collect())
        .unwrap_or_default();
    if obligation_regex().is_match(&rule.description) {
        obligations.push(rule.description.clone());
    }
    obligations.retain(|o| !o.trim().is_empty());
    obligations
}
