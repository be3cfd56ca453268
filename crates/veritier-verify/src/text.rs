//! Shared lexical utilities for the heuristic verification tiers.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Words signalling an obligation, permission, or prohibition.
pub const DEONTIC_PATTERN: &str =
    r"(?i)\b(shall|must|may|required|permitted|obliged|prohibited|forbidden)\b";

/// Negation markers, including the `n't` contraction.
const NEGATION_PATTERN: &str =
    r"(?i)\b(not|no|never|without|prohibited|forbidden|excluded|denied)\b|n't\b";

fn deontic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DEONTIC_PATTERN).expect("deontic regex"))
}

fn negation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NEGATION_PATTERN).expect("negation regex"))
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z]+").expect("word regex"))
}

/// Lowercase alphabetic tokens of at least `min_len` characters.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    word_regex()
        .find_iter(text)
        .filter(|m| m.as_str().len() >= min_len)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Deduplicated token set of at least `min_len` characters.
pub fn token_set(text: &str, min_len: usize) -> BTreeSet<String> {
    tokenize(text, min_len).into_iter().collect()
}

/// Split into sentences on `.`/`!`/`?` boundaries, trimmed and non-empty.
pub fn split_sentences(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence regex"));
    re.split(text)
        .map(|s| s.trim().trim_end_matches(['.', '!', '?']))
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Sentences carrying at least one deontic marker.
pub fn deontic_sentences(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .filter(|s| has_deontic_marker(s))
        .collect()
}

pub fn has_deontic_marker(text: &str) -> bool {
    deontic_regex().is_match(text)
}

/// The set of deontic marker words present in the text, lowercased.
pub fn deontic_markers(text: &str) -> BTreeSet<String> {
    deontic_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

pub fn has_negation(text: &str) -> bool {
    negation_regex().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_filters_short_and_nonalpha() {
        let tokens = tokenize("The issuer must publish a whitepaper by 2024!", 3);
        assert_eq!(
            tokens,
            vec!["the", "issuer", "must", "publish", "whitepaper"]
        );
    }

    #[test]
    fn sentence_split_trims_terminators() {
        let sentences =
            split_sentences("Issuers must register. Custody is permitted! Anything else?");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "Issuers must register");
        assert_eq!(sentences[1], "Custody is permitted");
    }

    #[test]
    fn deontic_sentences_selected() {
        let text = "The sky is blue. Issuers shall publish a whitepaper. Trading may continue.";
        let found = deontic_sentences(text);
        assert_eq!(found.len(), 2);
        assert!(found[0].contains("shall"));
    }

    #[test]
    fn negation_detects_contractions() {
        assert!(has_negation("The issuer isn't authorized"));
        assert!(has_negation("Trading is prohibited"));
        assert!(!has_negation("The issuer is authorized"));
    }

    #[test]
    fn deontic_markers_deduplicated() {
        let markers = deontic_markers("Issuers must register and must disclose; they may trade.");
        assert_eq!(markers.len(), 2);
        assert!(markers.contains("must"));
        assert!(markers.contains("may"));
    }
}
