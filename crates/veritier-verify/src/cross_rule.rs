//! Tier 4: cross-rule coherence within a rule corpus.
//!
//! Three deterministic checks against a set of related rules: outcome
//! contradiction, lex specialis hierarchy, and temporal overlap of
//! conflicting validity windows. No source text involved.

use chrono::NaiveDate;
use serde::Serialize;
use veritier_core::{ConsistencyEvidence, EvidenceLabel, Rule};

const TIER: u8 = 4;

/// Mutually exclusive outcome pairs, matched in both orders.
const CONTRADICTING_OUTCOMES: &[(&str, &str)] = &[
    ("permitted", "prohibited"),
    ("required", "forbidden"),
    ("authorized", "denied"),
    ("compliant", "non_compliant"),
    ("exempt", "subject_to"),
    ("allowed", "forbidden"),
    ("mandatory", "optional"),
];

/// Contradiction severity ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContradictionSeverity {
    None,
    Low,
    High,
}

/// One contradicting outcome pair found between two rules.
#[derive(Debug, Clone, Serialize)]
pub struct ContradictionPair {
    pub rule1_id: String,
    pub rule1_outcome: String,
    pub rule2_id: String,
    pub rule2_outcome: String,
    pub conditions_overlap: bool,
}

/// Detailed contradiction result behind the evidence record.
#[derive(Debug, Clone, Serialize)]
pub struct ContradictionResult {
    pub has_contradiction: bool,
    pub contradicting_rule_ids: Vec<String>,
    pub pairs: Vec<ContradictionPair>,
    pub severity: ContradictionSeverity,
}

/// A lex specialis violation: conflicting rules at different specificity.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyViolation {
    pub more_specific_rule: String,
    pub less_specific_rule: String,
    pub more_specific_score: usize,
    pub less_specific_score: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyResult {
    pub is_consistent: bool,
    pub violations: Vec<HierarchyViolation>,
}

/// A conflicting rule pair active during the same period.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalConflict {
    pub rule1_id: String,
    pub rule2_id: String,
    pub overlap_start: NaiveDate,
    pub overlap_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalResult {
    pub is_consistent: bool,
    pub conflicts: Vec<TemporalConflict>,
}

/// Cross-rule coherence checker over a fixed set of related rules.
#[derive(Debug, Clone, Default)]
pub struct CrossRuleChecker {
    related_rules: Vec<Rule>,
}

impl CrossRuleChecker {
    pub fn new(related_rules: Vec<Rule>) -> Self {
        Self { related_rules }
    }

    /// Run all three cross-rule checks. An empty corpus passes everything.
    pub fn check(&self, rule: &Rule) -> Vec<ConsistencyEvidence> {
        vec![
            self.check_contradiction(rule).1,
            self.check_hierarchy(rule).1,
            self.check_temporal(rule).1,
        ]
    }

    /// Contradicting outcomes between the rule and its neighbors. Severity
    /// is high (fail) only when the contradicting rules' applicability
    /// conditions could fire for the same scenario.
    pub fn check_contradiction(&self, rule: &Rule) -> (ContradictionResult, ConsistencyEvidence) {
        if self.related_rules.is_empty() {
            let result = ContradictionResult {
                has_contradiction: false,
                contradicting_rule_ids: vec![],
                pairs: vec![],
                severity: ContradictionSeverity::None,
            };
            let evidence = ConsistencyEvidence::new(
                TIER,
                "no_contradiction",
                EvidenceLabel::Pass,
                1.0,
                "no related rules provided for comparison",
            );
            return (result, evidence);
        }

        let primary_outcomes = rule.outcomes();
        let mut pairs = Vec::new();
        let mut contradicting_ids: Vec<String> = Vec::new();

        for other in self.neighbors(rule) {
            for p_outcome in &primary_outcomes {
                for o_outcome in &other.outcomes() {
                    if are_contradicting(p_outcome, o_outcome) {
                        pairs.push(ContradictionPair {
                            rule1_id: rule.rule_id.clone(),
                            rule1_outcome: p_outcome.clone(),
                            rule2_id: other.rule_id.clone(),
                            rule2_outcome: o_outcome.clone(),
                            conditions_overlap: conditions_overlap(rule, other),
                        });
                        if !contradicting_ids.contains(&other.rule_id) {
                            contradicting_ids.push(other.rule_id.clone());
                        }
                    }
                }
            }
        }

        let (severity, label, score, details) = if pairs.is_empty() {
            (
                ContradictionSeverity::None,
                EvidenceLabel::Pass,
                1.0,
                "no contradicting outcomes found with related rules".to_string(),
            )
        } else if pairs.iter().any(|p| p.conditions_overlap) {
            (
                ContradictionSeverity::High,
                EvidenceLabel::Fail,
                0.2,
                format!(
                    "found {} contradiction(s) with overlapping conditions; conflicting rules: {}",
                    pairs.len(),
                    contradicting_ids.join(", ")
                ),
            )
        } else {
            (
                ContradictionSeverity::Low,
                EvidenceLabel::Warning,
                0.7,
                format!(
                    "found {} potential contradiction(s) but conditions appear disjoint; rules: {}",
                    pairs.len(),
                    contradicting_ids.join(", ")
                ),
            )
        };

        let result = ContradictionResult {
            has_contradiction: !pairs.is_empty(),
            contradicting_rule_ids: contradicting_ids,
            pairs,
            severity,
        };
        let evidence = ConsistencyEvidence::new(TIER, "no_contradiction", label, score, details)
            .with_rule_element("decision_tree");
        (result, evidence)
    }

    /// Lex specialis: conflicting rules at different specificity levels get
    /// flagged so the more specific rule can be ordered first.
    pub fn check_hierarchy(&self, rule: &Rule) -> (HierarchyResult, ConsistencyEvidence) {
        if self.related_rules.is_empty() {
            let result = HierarchyResult {
                is_consistent: true,
                violations: vec![],
            };
            let evidence = ConsistencyEvidence::new(
                TIER,
                "hierarchy_consistent",
                EvidenceLabel::Pass,
                1.0,
                "no related rules provided for hierarchy comparison",
            );
            return (result, evidence);
        }

        let primary_specificity = rule.specificity();
        let primary_outcomes = rule.outcomes();
        let mut violations = Vec::new();

        for other in self.neighbors(rule) {
            let other_specificity = other.specificity();
            if primary_specificity == other_specificity {
                continue;
            }
            if !has_outcome_conflict(&primary_outcomes, &other.outcomes()) {
                continue;
            }
            let (more, less) = if primary_specificity > other_specificity {
                (rule, other)
            } else {
                (other, rule)
            };
            violations.push(HierarchyViolation {
                more_specific_rule: more.rule_id.clone(),
                less_specific_rule: less.rule_id.clone(),
                more_specific_score: primary_specificity.max(other_specificity),
                less_specific_score: primary_specificity.min(other_specificity),
            });
        }

        let evidence = if violations.is_empty() {
            ConsistencyEvidence::new(
                TIER,
                "hierarchy_consistent",
                EvidenceLabel::Pass,
                1.0,
                format!(
                    "rule specificity score: {primary_specificity}; no lex specialis violations found"
                ),
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                "hierarchy_consistent",
                EvidenceLabel::Warning,
                0.6,
                format!(
                    "found {} hierarchy violation(s); rule specificity: {primary_specificity}; \
                     order rules so more specific rules take precedence",
                    violations.len()
                ),
            )
        }
        .with_rule_element("applies_if,decision_tree");

        let result = HierarchyResult {
            is_consistent: violations.is_empty(),
            violations,
        };
        (result, evidence)
    }

    /// Conflicting rules whose validity windows overlap. Missing bounds are
    /// treated as unbounded.
    pub fn check_temporal(&self, rule: &Rule) -> (TemporalResult, ConsistencyEvidence) {
        if self.related_rules.is_empty() {
            let result = TemporalResult {
                is_consistent: true,
                conflicts: vec![],
            };
            let evidence = ConsistencyEvidence::new(
                TIER,
                "temporal_consistent",
                EvidenceLabel::Pass,
                1.0,
                "no related rules provided for temporal comparison",
            );
            return (result, evidence);
        }

        let primary_outcomes = rule.outcomes();
        let mut conflicts = Vec::new();

        for other in self.neighbors(rule) {
            if !has_outcome_conflict(&primary_outcomes, &other.outcomes()) {
                continue;
            }
            if let Some((start, end)) = periods_overlap(
                rule.effective_from,
                rule.effective_to,
                other.effective_from,
                other.effective_to,
            ) {
                conflicts.push(TemporalConflict {
                    rule1_id: rule.rule_id.clone(),
                    rule2_id: other.rule_id.clone(),
                    overlap_start: start,
                    overlap_end: end,
                });
            }
        }

        let evidence = if conflicts.is_empty() {
            ConsistencyEvidence::new(
                TIER,
                "temporal_consistent",
                EvidenceLabel::Pass,
                1.0,
                format!(
                    "rule validity: {} to {}; no temporal conflicts found",
                    fmt_bound(rule.effective_from),
                    fmt_bound(rule.effective_to)
                ),
            )
        } else {
            let ids: Vec<&str> = conflicts.iter().map(|c| c.rule2_id.as_str()).collect();
            ConsistencyEvidence::new(
                TIER,
                "temporal_consistent",
                EvidenceLabel::Warning,
                0.5,
                format!(
                    "found {} temporal conflict(s); conflicting rules active in same period: {}",
                    conflicts.len(),
                    ids.join(", ")
                ),
            )
        }
        .with_rule_element("effective_from,effective_to");

        let result = TemporalResult {
            is_consistent: conflicts.is_empty(),
            conflicts,
        };
        (result, evidence)
    }

    fn neighbors<'a>(&'a self, rule: &'a Rule) -> impl Iterator<Item = &'a Rule> {
        self.related_rules
            .iter()
            .filter(move |other| other.rule_id != rule.rule_id)
    }
}

fn are_contradicting(outcome1: &str, outcome2: &str) -> bool {
    CONTRADICTING_OUTCOMES
        .iter()
        .any(|&(a, b)| (outcome1 == a && outcome2 == b) || (outcome1 == b && outcome2 == a))
}

fn has_outcome_conflict(outcomes1: &[String], outcomes2: &[String]) -> bool {
    outcomes1
        .iter()
        .any(|o1| outcomes2.iter().any(|o2| are_contradicting(o1, o2)))
}

/// Conservative scope overlap: a rule without applicability conditions
/// applies broadly; rules testing entirely different fields are treated as
/// disjoint; everything else counts as overlapping.
fn conditions_overlap(rule1: &Rule, rule2: &Rule) -> bool {
    let (Some(cond1), Some(cond2)) = (&rule1.applies_if, &rule2.applies_if) else {
        return true;
    };
    let fields1 = cond1.field_set();
    let fields2 = cond2.field_set();
    if !fields1.is_empty() && !fields2.is_empty() && fields1.is_disjoint(&fields2) {
        return false;
    }
    true
}

// Sentinels for unbounded validity windows.
fn min_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn max_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// The overlap of two validity windows, if any.
fn periods_overlap(
    start1: Option<NaiveDate>,
    end1: Option<NaiveDate>,
    start2: Option<NaiveDate>,
    end2: Option<NaiveDate>,
) -> Option<(NaiveDate, NaiveDate)> {
    let overlap_start = start1.unwrap_or_else(min_date).max(start2.unwrap_or_else(min_date));
    let overlap_end = end1.unwrap_or_else(max_date).min(end2.unwrap_or_else(max_date));
    (overlap_start <= overlap_end).then_some((overlap_start, overlap_end))
}

fn fmt_bound(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string())
        .unwrap_or_else(|| "unbounded".to_string())
}
