//! Entailment classification with dual ML/heuristic modes.
//!
//! The preferred path runs a (premise, hypothesis) pair through an injected
//! NLI backend (an MNLI cross-encoder). The heuristic path approximates the
//! three-way decision from negation polarity and token overlap. Per-clause
//! results aggregate into a single verdict with sticky contradictions.

use std::sync::Arc;

use tracing::debug;

use crate::text::{has_negation, token_set};

/// Three-way NLI verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NliLabel {
    Entailment,
    Neutral,
    Contradiction,
}

impl NliLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entailment => "entailment",
            Self::Neutral => "neutral",
            Self::Contradiction => "contradiction",
        }
    }
}

/// Classification result with the full score distribution.
#[derive(Debug, Clone)]
pub struct NliResult {
    pub label: NliLabel,
    /// Confidence of the winning label, in [0, 1].
    pub confidence: f64,
    pub entailment_score: f64,
    pub neutral_score: f64,
    pub contradiction_score: f64,
    /// "model" or "heuristic".
    pub mode: &'static str,
}

impl NliResult {
    fn heuristic(
        label: NliLabel,
        confidence: f64,
        scores: (f64, f64, f64),
    ) -> Self {
        Self {
            label,
            confidence,
            entailment_score: scores.0,
            neutral_score: scores.1,
            contradiction_score: scores.2,
            mode: "heuristic",
        }
    }
}

/// Cross-encoder NLI provider (e.g. an ONNX MNLI model).
pub trait NliBackend: Send + Sync {
    /// Returns (entailment, neutral, contradiction) probabilities.
    fn classify(&self, premise: &str, hypothesis: &str) -> anyhow::Result<(f64, f64, f64)>;
}

#[cfg(feature = "onnx")]
impl NliBackend for veritier_ai::NliSession {
    fn classify(&self, premise: &str, hypothesis: &str) -> anyhow::Result<(f64, f64, f64)> {
        let scores = veritier_ai::NliSession::classify(self, premise, hypothesis)?;
        Ok((scores.entailment, scores.neutral, scores.contradiction))
    }
}

/// Dual-mode entailment classifier.
#[derive(Clone, Default)]
pub struct EntailmentClassifier {
    backend: Option<Arc<dyn NliBackend>>,
}

impl EntailmentClassifier {
    /// Pure-heuristic classifier, no ML dependency.
    pub fn heuristic() -> Self {
        Self { backend: None }
    }

    /// Classifier preferring the given NLI backend.
    pub fn with_backend(backend: Arc<dyn NliBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Classify whether `premise` entails `hypothesis`.
    pub fn classify(&self, premise: &str, hypothesis: &str) -> NliResult {
        if let Some(backend) = &self.backend {
            match backend.classify(premise, hypothesis) {
                Ok((entailment, neutral, contradiction)) => {
                    let (label, confidence) = argmax(entailment, neutral, contradiction);
                    return NliResult {
                        label,
                        confidence,
                        entailment_score: entailment,
                        neutral_score: neutral,
                        contradiction_score: contradiction,
                        mode: "model",
                    };
                }
                Err(e) => {
                    debug!(error = %e, "NLI backend failed, falling back to heuristics");
                }
            }
        }
        heuristic_classify(premise, hypothesis)
    }

    /// Aggregate per-clause results into a single verdict.
    ///
    /// Scores are averaged componentwise. A contradiction with confidence
    /// above 0.6 is sticky and wins outright; otherwise the majority label
    /// wins (entailment over neutral over contradiction on ties) with the
    /// mean confidence of its members.
    pub fn aggregate(&self, results: &[NliResult]) -> NliResult {
        if results.is_empty() {
            return NliResult {
                label: NliLabel::Neutral,
                confidence: 0.5,
                entailment_score: 0.33,
                neutral_score: 0.34,
                contradiction_score: 0.33,
                mode: "heuristic",
            };
        }

        let n = results.len() as f64;
        let entailment = results.iter().map(|r| r.entailment_score).sum::<f64>() / n;
        let neutral = results.iter().map(|r| r.neutral_score).sum::<f64>() / n;
        let contradiction = results.iter().map(|r| r.contradiction_score).sum::<f64>() / n;
        let mode = if results.iter().any(|r| r.mode == "model") {
            "model"
        } else {
            "heuristic"
        };

        let strongest_contradiction = results
            .iter()
            .filter(|r| r.label == NliLabel::Contradiction && r.confidence > 0.6)
            .map(|r| r.confidence)
            .fold(f64::NAN, f64::max);
        if !strongest_contradiction.is_nan() {
            return NliResult {
                label: NliLabel::Contradiction,
                confidence: strongest_contradiction,
                entailment_score: entailment,
                neutral_score: neutral,
                contradiction_score: contradiction,
                mode,
            };
        }

        let mut best = (NliLabel::Neutral, 0usize);
        for label in [NliLabel::Entailment, NliLabel::Neutral, NliLabel::Contradiction] {
            let count = results.iter().filter(|r| r.label == label).count();
            if count > best.1 {
                best = (label, count);
            }
        }
        let members: Vec<&NliResult> = results.iter().filter(|r| r.label == best.0).collect();
        let confidence = members.iter().map(|r| r.confidence).sum::<f64>() / members.len() as f64;

        NliResult {
            label: best.0,
            confidence,
            entailment_score: entailment,
            neutral_score: neutral,
            contradiction_score: contradiction,
            mode,
        }
    }
}

fn argmax(entailment: f64, neutral: f64, contradiction: f64) -> (NliLabel, f64) {
    if entailment >= neutral && entailment >= contradiction {
        (NliLabel::Entailment, entailment)
    } else if contradiction >= neutral {
        (NliLabel::Contradiction, contradiction)
    } else {
        (NliLabel::Neutral, neutral)
    }
}

/// Negation-polarity and token-overlap approximation of NLI.
///
/// Mismatched negation polarity between premise and hypothesis reads as a
/// contradiction. High token overlap reads as entailment, moderate overlap
/// as neutral. Confidences are deliberately modest.
fn heuristic_classify(premise: &str, hypothesis: &str) -> NliResult {
    let premise_negated = has_negation(premise);
    let hypothesis_negated = has_negation(hypothesis);
    if premise_negated != hypothesis_negated {
        return NliResult::heuristic(NliLabel::Contradiction, 0.6, (0.2, 0.2, 0.6));
    }

    let premise_tokens = token_set(premise, 3);
    let hypothesis_tokens = token_set(hypothesis, 3);
    if hypothesis_tokens.is_empty() {
        return NliResult::heuristic(NliLabel::Neutral, 0.4, (0.3, 0.4, 0.3));
    }

    let overlap = hypothesis_tokens.intersection(&premise_tokens).count() as f64
        / hypothesis_tokens.len() as f64;

    if overlap > 0.7 {
        let confidence = (0.5 + (overlap - 0.7)).min(0.8);
        NliResult::heuristic(NliLabel::Entailment, confidence, (confidence, 0.15, 0.05))
    } else if overlap > 0.4 {
        NliResult::heuristic(NliLabel::Neutral, 0.5, (0.3, 0.5, 0.2))
    } else {
        NliResult::heuristic(NliLabel::Neutral, 0.4, (0.25, 0.4, 0.35))
    }
}
