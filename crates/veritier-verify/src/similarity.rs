//! Semantic similarity scoring with dual ML/heuristic modes.
//!
//! The preferred path scores text pairs through an injected embedding
//! backend (dense-vector cosine). The heuristic path is always available:
//! TF-IDF cosine, character n-gram Jaccard, and token-set Jaccard, combined
//! with fixed weights. Backend failures fall back transparently; callers
//! only see the mode tag in the details string.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::text::tokenize;

/// Graded similarity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityLabel {
    /// score >= 0.75
    High,
    /// score >= 0.50
    Medium,
    /// score < 0.50
    Low,
}

pub const HIGH_THRESHOLD: f64 = 0.75;
pub const MEDIUM_THRESHOLD: f64 = 0.50;

impl SimilarityLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Result of one similarity computation.
#[derive(Debug, Clone)]
pub struct Similarity {
    pub score: f64,
    pub label: SimilarityLabel,
    pub details: String,
}

/// Dense-vector similarity provider (e.g. an ONNX sentence encoder).
pub trait EmbeddingBackend: Send + Sync {
    /// Cosine similarity of two texts in [0, 1].
    fn similarity(&self, text_a: &str, text_b: &str) -> anyhow::Result<f64>;
}

#[cfg(feature = "onnx")]
impl EmbeddingBackend for veritier_ai::SentenceEncoder {
    fn similarity(&self, text_a: &str, text_b: &str) -> anyhow::Result<f64> {
        veritier_ai::SentenceEncoder::similarity(self, text_a, text_b)
    }
}

/// Dual-mode similarity scorer.
#[derive(Clone, Default)]
pub struct SimilarityScorer {
    backend: Option<Arc<dyn EmbeddingBackend>>,
}

impl SimilarityScorer {
    /// Pure-heuristic scorer, no ML dependency.
    pub fn heuristic() -> Self {
        Self { backend: None }
    }

    /// Scorer preferring the given embedding backend.
    pub fn with_backend(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Score two text spans in [0, 1].
    pub fn score(&self, text_a: &str, text_b: &str) -> Similarity {
        if let Some(backend) = &self.backend {
            match backend.similarity(text_a, text_b) {
                Ok(score) => {
                    return Similarity {
                        score,
                        label: SimilarityLabel::from_score(score),
                        details: format!("embedding similarity: {score:.3}"),
                    };
                }
                Err(e) => {
                    debug!(error = %e, "embedding backend failed, falling back to heuristics");
                }
            }
        }
        self.heuristic_score(text_a, text_b)
    }

    /// Weighted combination of TF-IDF cosine, n-gram Jaccard, and token
    /// Jaccard: 0.40 / 0.35 / 0.25.
    fn heuristic_score(&self, text_a: &str, text_b: &str) -> Similarity {
        let tokens_a = tokenize(text_a, 2);
        let tokens_b = tokenize(text_b, 2);

        if tokens_a.is_empty() || tokens_b.is_empty() {
            return Similarity {
                score: 0.0,
                label: SimilarityLabel::Low,
                details: "unable to tokenize texts for comparison".into(),
            };
        }

        let tfidf = tfidf_cosine(&tokens_a, &tokens_b);
        let ngram = ngram_similarity(text_a, text_b, &[2, 3]);
        let jaccard = token_jaccard(&tokens_a, &tokens_b);

        let score = 0.40 * tfidf + 0.35 * ngram + 0.25 * jaccard;
        Similarity {
            score,
            label: SimilarityLabel::from_score(score),
            details: format!(
                "heuristic similarity: {score:.3} (tfidf={tfidf:.2}, ngram={ngram:.2}, jaccard={jaccard:.2})"
            ),
        }
    }
}

// ── Heuristic components ──

/// TF-IDF weighted cosine over the union vocabulary, treating each text as
/// its own one-document corpus. IDF = ln((2+1)/(df+1)) + 1 with df in {1,2}.
fn tfidf_cosine(tokens_a: &[String], tokens_b: &[String]) -> f64 {
    let tf_a = term_frequencies(tokens_a);
    let tf_b = term_frequencies(tokens_b);

    let vocabulary: BTreeSet<&str> = tf_a.keys().chain(tf_b.keys()).map(|s| s.as_str()).collect();
    if vocabulary.is_empty() {
        return 0.0;
    }

    let mut vec_a = Vec::with_capacity(vocabulary.len());
    let mut vec_b = Vec::with_capacity(vocabulary.len());
    for term in vocabulary {
        let df = usize::from(tf_a.contains_key(term)) + usize::from(tf_b.contains_key(term));
        let idf = (3.0 / (df as f64 + 1.0)).ln() + 1.0;
        vec_a.push(tf_a.get(term).copied().unwrap_or(0) as f64 * idf);
        vec_b.push(tf_b.get(term).copied().unwrap_or(0) as f64 * idf);
    }
    cosine(&vec_a, &vec_b)
}

fn term_frequencies(tokens: &[String]) -> BTreeMap<String, usize> {
    let mut tf = BTreeMap::new();
    for token in tokens {
        *tf.entry(token.clone()).or_insert(0) += 1;
    }
    tf
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Character n-gram Jaccard, averaged over the given n values.
fn ngram_similarity(text_a: &str, text_b: &str, n_values: &[usize]) -> f64 {
    if n_values.is_empty() {
        return 0.0;
    }
    let a = text_a.to_lowercase();
    let b = text_b.to_lowercase();

    let mut total = 0.0;
    for &n in n_values {
        let grams_a = char_ngrams(&a, n);
        let grams_b = char_ngrams(&b, n);
        if !grams_a.is_empty() && !grams_b.is_empty() {
            let intersection = grams_a.intersection(&grams_b).count();
            let union = grams_a.union(&grams_b).count();
            total += intersection as f64 / union as f64;
        }
    }
    total / n_values.len() as f64
}

fn char_ngrams(text: &str, n: usize) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < n {
        return BTreeSet::new();
    }
    (0..=chars.len() - n)
        .map(|i| chars[i..i + n].iter().collect())
        .collect()
}

fn token_jaccard(tokens_a: &[String], tokens_b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = tokens_a.iter().map(|s| s.as_str()).collect();
    let set_b: BTreeSet<&str> = tokens_b.iter().map(|s| s.as_str()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        let scorer = SimilarityScorer::heuristic();
        let text = "Issuers of asset-referenced tokens must publish a whitepaper";
        let result = scorer.score(text, text);
        assert!(
            (result.score - 1.0).abs() < 1e-9,
            "expected 1.0, got {}",
            result.score
        );
        assert_eq!(result.label, SimilarityLabel::High);
    }

    #[test]
    fn score_is_symmetric() {
        let scorer = SimilarityScorer::heuristic();
        let a = "custody providers must segregate client assets";
        let b = "client assets shall be held separately by custodians";
        let ab = scorer.score(a, b).score;
        let ba = scorer.score(b, a).score;
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn disjoint_token_texts_have_zero_jaccard() {
        let tokens_a = tokenize("alpha bravo charlie", 2);
        let tokens_b = tokenize("delta echo foxtrot", 2);
        assert_eq!(token_jaccard(&tokens_a, &tokens_b), 0.0);
    }

    #[test]
    fn empty_text_scores_zero_low() {
        let scorer = SimilarityScorer::heuristic();
        let result = scorer.score("", "issuers must register");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.label, SimilarityLabel::Low);
    }

    #[test]
    fn related_texts_beat_unrelated() {
        let scorer = SimilarityScorer::heuristic();
        let rule = "public offering of utility tokens requires a published whitepaper";
        let related = "a whitepaper must be published before any public offering of tokens";
        let unrelated = "the lighthouse keeper polishes the lamp at dawn";
        let close = scorer.score(rule, related).score;
        let far = scorer.score(rule, unrelated).score;
        assert!(close > far, "close={close:.3} far={far:.3}");
    }

    #[test]
    fn failing_backend_falls_back_to_heuristics() {
        struct Broken;
        impl EmbeddingBackend for Broken {
            fn similarity(&self, _: &str, _: &str) -> anyhow::Result<f64> {
                anyhow::bail!("model crashed")
            }
        }
        let scorer = SimilarityScorer::with_backend(Arc::new(Broken));
        let text = "issuers must publish a whitepaper";
        let result = scorer.score(text, text);
        assert!((result.score - 1.0).abs() < 1e-9);
        assert!(result.details.starts_with("heuristic"));
    }

    #[test]
    fn working_backend_is_preferred() {
        struct Fixed(f64);
        impl EmbeddingBackend for Fixed {
            fn similarity(&self, _: &str, _: &str) -> anyhow::Result<f64> {
                Ok(self.0)
            }
        }
        let scorer = SimilarityScorer::with_backend(Arc::new(Fixed(0.82)));
        let result = scorer.score("a", "b");
        assert_eq!(result.score, 0.82);
        assert_eq!(result.label, SimilarityLabel::High);
        assert!(result.details.starts_with("embedding"));
    }

    #[test]
    fn thresholds_map_to_labels() {
        assert_eq!(SimilarityLabel::from_score(0.75), SimilarityLabel::High);
        assert_eq!(SimilarityLabel::from_score(0.74), SimilarityLabel::Medium);
        assert_eq!(SimilarityLabel::from_score(0.50), SimilarityLabel::Medium);
        assert_eq!(SimilarityLabel::from_score(0.49), SimilarityLabel::Low);
    }
}
