//! ONNX Runtime NLI classification for the entailment tier.
//!
//! Loads the first model that works from an ordered preference list of
//! model directories (each containing `model.onnx` and `tokenizer.json`,
//! exported from an MNLI-style cross-encoder). Output logits are softmaxed
//! into the three NLI buckets.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// Softmaxed three-way NLI scores. Components sum to ~1.
#[derive(Debug, Clone, Copy)]
pub struct NliScores {
    pub entailment: f64,
    pub neutral: f64,
    pub contradiction: f64,
}

/// MNLI cross-encoder session.
///
/// MNLI exports order their logits (contradiction, neutral, entailment);
/// a different order can be supplied for models that deviate.
pub struct NliSession {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    /// Bucket name per logit index; matched by "entail"/"neutral"/"contradict"
    /// substring, case-insensitive.
    label_order: Vec<String>,
}

const DEFAULT_LABEL_ORDER: [&str; 3] = ["contradiction", "neutral", "entailment"];

impl NliSession {
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        Self::load_with_labels(
            model_dir,
            DEFAULT_LABEL_ORDER.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn load_with_labels(model_dir: &Path, label_order: Vec<String>) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );
        anyhow::ensure!(label_order.len() == 3, "NLI label order must name 3 buckets");

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: 512,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;

        info!(model = %model_path.display(), "loaded NLI model");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            label_order,
        })
    }

    /// Classify a (premise, hypothesis) pair into the three NLI buckets.
    pub fn classify(&self, premise: &str, hypothesis: &str) -> anyhow::Result<NliScores> {
        let encoding = self
            .tokenizer
            .encode((premise, hypothesis), true)
            .map_err(|e| anyhow::anyhow!("tokenize pair: {e}"))?;

        let seq_len = encoding.get_ids().len();
        let shape = [1i64, seq_len as i64];
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&i| i as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();

        let ids = Tensor::from_array((shape, ids.into_boxed_slice()))?;
        let mask = Tensor::from_array((shape, mask.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("NLI session poisoned"))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask,
        ])?;

        let (out_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = out_shape;
        anyhow::ensure!(
            dims.last() == Some(&3),
            "unexpected NLI output shape: {dims:?}"
        );

        let probs = softmax(&logits[..3]);
        let mut scores = NliScores {
            entailment: 0.0,
            neutral: 0.0,
            contradiction: 0.0,
        };
        for (label, &p) in self.label_order.iter().zip(probs.iter()) {
            let lower = label.to_lowercase();
            if lower.contains("entail") {
                scores.entailment = p;
            } else if lower.contains("contradict") {
                scores.contradiction = p;
            } else if lower.contains("neutral") {
                scores.neutral = p;
            }
        }
        Ok(scores)
    }
}

fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits.iter().map(|&l| f64::from(l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Process-wide lazy handle trying an ordered list of model directories.
///
/// The first directory that loads wins and is cached; if none load, the
/// handle stays permanently empty (load is attempted once per process).
pub struct NliHandle {
    model_dirs: Vec<PathBuf>,
    session: OnceLock<Option<std::sync::Arc<NliSession>>>,
}

impl NliHandle {
    pub fn new(model_dirs: Vec<PathBuf>) -> Self {
        Self {
            model_dirs,
            session: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<std::sync::Arc<NliSession>> {
        self.session
            .get_or_init(|| {
                for dir in &self.model_dirs {
                    match NliSession::load(dir) {
                        Ok(session) => return Some(std::sync::Arc::new(session)),
                        Err(e) => {
                            warn!(dir = %dir.display(), error = %e, "NLI model failed to load");
                        }
                    }
                }
                warn!("no NLI model available, using heuristic entailment");
                None
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn empty_preference_list_disables_handle() {
        let handle = NliHandle::new(vec![]);
        assert!(handle.get().is_none());
    }

    #[test]
    fn missing_dirs_fall_through_to_none() {
        let handle = NliHandle::new(vec![
            PathBuf::from("/nonexistent/deberta-mnli"),
            PathBuf::from("/nonexistent/roberta-mnli"),
        ]);
        assert!(handle.get().is_none());
        assert!(handle.get().is_none());
    }
}
