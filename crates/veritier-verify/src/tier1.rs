//! Tier 1: lexical consistency between rule text and source text.
//!
//! Six deterministic word-level heuristics. All of them need the legal
//! source text; without it every check degrades to a warning at 0.5, the
//! same convention the semantic tiers use.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use veritier_core::{ConsistencyEvidence, EvidenceLabel, Rule};

use crate::text::{deontic_markers, deontic_sentences, has_negation, token_set};

const TIER: u8 = 1;

/// Regulated-party nouns worth cross-checking between rule and source.
const ACTOR_TERMS: &[&str] = &[
    "issuer",
    "provider",
    "custodian",
    "institution",
    "firm",
    "operator",
    "entity",
    "person",
    "offeror",
    "platform",
    "exchange",
    "intermediary",
];

/// Financial-instrument nouns worth cross-checking.
const INSTRUMENT_TERMS: &[&str] = &[
    "token",
    "tokens",
    "stablecoin",
    "security",
    "securities",
    "instrument",
    "asset",
    "assets",
    "derivative",
    "cryptoasset",
    "share",
    "shares",
    "bond",
    "bonds",
    "fund",
    "deposit",
];

const EXCEPTION_PATTERN: &str =
    r"(?i)\b(except|unless|exempt|exemption|derogation|notwithstanding|waiver)\b";

fn exception_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EXCEPTION_PATTERN).expect("exception regex"))
}

/// Lexical consistency checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalChecker;

impl LexicalChecker {
    pub fn new() -> Self {
        Self
    }

    /// Run all six lexical checks against the legal source text.
    pub fn check(&self, rule: &Rule, source_text: Option<&str>) -> Vec<ConsistencyEvidence> {
        let Some(source) = source_text.filter(|s| !s.trim().is_empty()) else {
            return [
                "deontic_alignment",
                "actor_mentioned",
                "instrument_mentioned",
                "keyword_overlap",
                "negation_consistency",
                "exception_coverage",
            ]
            .into_iter()
            .map(|category| {
                ConsistencyEvidence::new(
                    TIER,
                    category,
                    EvidenceLabel::Warning,
                    0.5,
                    "no source text available for lexical comparison",
                )
            })
            .collect();
        };

        let rule_text = rule_text(rule);
        vec![
            self.check_deontic_alignment(&rule_text, source),
            self.check_actor_mentioned(&rule_text, source),
            self.check_instrument_mentioned(&rule_text, source),
            self.check_keyword_overlap(&rule_text, source),
            self.check_negation_consistency(&rule_text, source),
            self.check_exception_coverage(rule, &rule_text, source),
        ]
    }

    fn check_deontic_alignment(&self, rule_text: &str, source: &str) -> ConsistencyEvidence {
        let rule_markers = deontic_markers(rule_text);
        if rule_markers.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "deontic_alignment",
                EvidenceLabel::Warning,
                0.5,
                "rule text carries no deontic marker (shall/must/may/...)",
            );
        }
        let source_markers = deontic_markers(source);
        let covered = rule_markers.intersection(&source_markers).count();
        let ratio = covered as f64 / rule_markers.len() as f64;
        let (label, details) = if ratio >= 0.8 {
            (
                EvidenceLabel::Pass,
                format!("{covered}/{} rule deontic marker(s) appear in source", rule_markers.len()),
            )
        } else if ratio >= 0.4 {
            (
                EvidenceLabel::Warning,
                format!(
                    "only {covered}/{} rule deontic marker(s) appear in source",
                    rule_markers.len()
                ),
            )
        } else {
            (
                EvidenceLabel::Fail,
                format!(
                    "rule deontic markers {:?} are absent from the source",
                    rule_markers.iter().collect::<Vec<_>>()
                ),
            )
        };
        ConsistencyEvidence::new(TIER, "deontic_alignment", label, ratio, details)
    }

    fn check_actor_mentioned(&self, rule_text: &str, source: &str) -> ConsistencyEvidence {
        self.check_lexicon(
            "actor_mentioned",
            ACTOR_TERMS,
            "actor",
            rule_text,
            source,
        )
    }

    fn check_instrument_mentioned(&self, rule_text: &str, source: &str) -> ConsistencyEvidence {
        self.check_lexicon(
            "instrument_mentioned",
            INSTRUMENT_TERMS,
            "instrument",
            rule_text,
            source,
        )
    }

    /// Shared actor/instrument logic: every lexicon term the rule mentions
    /// should also appear in the source.
    fn check_lexicon(
        &self,
        category: &str,
        lexicon: &[&str],
        kind: &str,
        rule_text: &str,
        source: &str,
    ) -> ConsistencyEvidence {
        let rule_tokens = token_set(rule_text, 2);
        let mentioned: BTreeSet<&str> = lexicon
            .iter()
            .copied()
            .filter(|t| rule_tokens.contains(*t))
            .collect();
        if mentioned.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                category,
                EvidenceLabel::Warning,
                0.5,
                format!("rule text names no recognizable {kind}"),
            );
        }
        let source_tokens = token_set(source, 2);
        let missing: Vec<&str> = mentioned
            .iter()
            .copied()
            .filter(|t| !source_tokens.contains(*t))
            .collect();
        if missing.is_empty() {
            ConsistencyEvidence::new(
                TIER,
                category,
                EvidenceLabel::Pass,
                1.0,
                format!("all {kind} term(s) confirmed in source: {mentioned:?}"),
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                category,
                EvidenceLabel::Warning,
                0.5,
                format!("{kind} term(s) not found in source: {missing:?}"),
            )
        }
    }

    fn check_keyword_overlap(&self, rule_text: &str, source: &str) -> ConsistencyEvidence {
        let rule_tokens = token_set(rule_text, 4);
        if rule_tokens.is_empty() {
            return ConsistencyEvidence::new(
                TIER,
                "keyword_overlap",
                EvidenceLabel::Warning,
                0.5,
                "rule text has no content keywords",
            );
        }
        let source_tokens = token_set(source, 4);
        let covered = rule_tokens.intersection(&source_tokens).count();
        let coverage = covered as f64 / rule_tokens.len() as f64;
        let label = if coverage >= 0.5 {
            EvidenceLabel::Pass
        } else if coverage >= 0.2 {
            EvidenceLabel::Warning
        } else {
            EvidenceLabel::Fail
        };
        ConsistencyEvidence::new(
            TIER,
            "keyword_overlap",
            label,
            coverage,
            format!(
                "{covered}/{} rule keyword(s) appear in source ({:.0}%)",
                rule_tokens.len(),
                coverage * 100.0
            ),
        )
    }

    /// Negation polarity of the rule text vs the source's deontic sentences.
    /// A mismatch is only a warning here; the entailment tier decides whether
    /// it amounts to a contradiction.
    fn check_negation_consistency(&self, rule_text: &str, source: &str) -> ConsistencyEvidence {
        let deontic = deontic_sentences(source);
        let source_scope = if deontic.is_empty() {
            source.to_string()
        } else {
            deontic.join(". ")
        };
        if has_negation(rule_text) == has_negation(&source_scope) {
            ConsistencyEvidence::new(
                TIER,
                "negation_consistency",
                EvidenceLabel::Pass,
                1.0,
                "negation polarity matches between rule and source",
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                "negation_consistency",
                EvidenceLabel::Warning,
                0.5,
                "negation polarity differs between rule text and source",
            )
        }
    }

    /// If the source carves out exceptions, the rule should model them
    /// (a disjunctive branch, or exception wording in its own text).
    fn check_exception_coverage(
        &self,
        rule: &Rule,
        rule_text: &str,
        source: &str,
    ) -> ConsistencyEvidence {
        if !exception_regex().is_match(source) {
            return ConsistencyEvidence::new(
                TIER,
                "exception_coverage",
                EvidenceLabel::Pass,
                1.0,
                "source text carves out no exceptions",
            );
        }
        let rule_models_exception = exception_regex().is_match(rule_text)
            || rule
                .applies_if
                .as_ref()
                .map(|c| c.has_disjunction())
                .unwrap_or(false);
        if rule_models_exception {
            ConsistencyEvidence::new(
                TIER,
                "exception_coverage",
                EvidenceLabel::Pass,
                1.0,
                "source exceptions are reflected in the rule",
            )
        } else {
            ConsistencyEvidence::new(
                TIER,
                "exception_coverage",
                EvidenceLabel::Warning,
                0.5,
                "source text carves out exceptions the rule does not model",
            )
            .with_rule_element("applies_if")
        }
    }
}

/// Concatenated rule prose: description plus interpretation notes.
fn rule_text(rule: &Rule) -> String {
    match &rule.interpretation_notes {
        Some(notes) if !notes.trim().is_empty() => {
            format!("{} {}", rule.description, notes)
        }
        _ => rule.description.clone(),
    }
}
