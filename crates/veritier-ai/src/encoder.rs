//! ONNX Runtime sentence encoder for semantic similarity scoring.
//!
//! Runs a sentence-transformers model (all-MiniLM-L6-v2 by default, 384
//! dimensions) with attention-masked mean pooling and L2 normalization, so
//! cosine similarity is a plain dot product. The model directory must
//! contain `model.onnx` and `tokenizer.json`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// Sentence embedding model wrapped for shared read access.
///
/// `Session::run` needs exclusive access, so the session sits behind a
/// mutex; the encoder itself is `Send + Sync` and safe to share once loaded.
pub struct SentenceEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dim: usize,
}

impl SentenceEncoder {
    /// Load the model from a directory containing `model.onnx` and
    /// `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: 256,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        info!(dim, model = %model_path.display(), "loaded sentence encoder");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dim,
        })
    }

    /// Embedding dimensionality (384 for all-MiniLM-L6-v2).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Cosine similarity of two texts, clamped to [0, 1].
    pub fn similarity(&self, text_a: &str, text_b: &str) -> anyhow::Result<f64> {
        let vectors = self.encode(&[text_a, text_b])?;
        // Unit vectors: cosine is the dot product.
        let cos: f32 = vectors[0].iter().zip(&vectors[1]).map(|(x, y)| x * y).sum();
        Ok(f64::from(cos).clamp(0.0, 1.0))
    }

    /// Encode texts into normalized embeddings, one vector per input.
    pub fn encode(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch = texts.len();
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let offset = i * seq_len;
            for (j, &id) in encoding.get_ids().iter().enumerate() {
                input_ids[offset + j] = id as i64;
            }
            for (j, &mask) in encoding.get_attention_mask().iter().enumerate() {
                attention_mask[offset + j] = mask as i64;
            }
            for (j, &tid) in encoding.get_type_ids().iter().enumerate() {
                token_type_ids[offset + j] = tid as i64;
            }
        }

        let shape = [batch as i64, seq_len as i64];
        let ids = Tensor::from_array((shape, input_ids.into_boxed_slice()))?;
        let mask = Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))?;
        let types = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("encoder session poisoned"))?;
        let outputs = session.run(ort::inputs![
            "input_ids" => ids,
            "attention_mask" => mask,
            "token_type_ids" => types,
        ])?;

        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = out_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] as usize == batch && dims[2] as usize == self.dim,
            "unexpected encoder output shape: {dims:?}"
        );
        let actual_seq = dims[1] as usize;

        let mut embeddings = Vec::with_capacity(batch);
        for i in 0..batch {
            let mut pooled = vec![0.0f32; self.dim];
            let mut token_count = 0.0f32;
            for j in 0..actual_seq {
                let mask_val = attention_mask[i * seq_len + j] as f32;
                if mask_val > 0.0 {
                    let offset = (i * actual_seq + j) * self.dim;
                    for (d, p) in pooled.iter_mut().enumerate() {
                        *p += data[offset + d] * mask_val;
                    }
                    token_count += mask_val;
                }
            }
            if token_count > 0.0 {
                for p in &mut pooled {
                    *p /= token_count;
                }
            }
            l2_normalize(&mut pooled);
            embeddings.push(pooled);
        }
        Ok(embeddings)
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn output_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}

/// Process-wide lazy handle for the sentence encoder.
///
/// Load is attempted at most once (single-flight via `OnceLock`); a failed
/// load permanently leaves the handle empty so callers stay on heuristics
/// without re-probing the filesystem on every check.
pub struct EncoderHandle {
    model_dir: PathBuf,
    encoder: OnceLock<Option<std::sync::Arc<SentenceEncoder>>>,
}

impl EncoderHandle {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            encoder: OnceLock::new(),
        }
    }

    /// Get the loaded encoder, attempting the load on first call.
    pub fn get(&self) -> Option<std::sync::Arc<SentenceEncoder>> {
        self.encoder
            .get_or_init(|| match SentenceEncoder::load(&self.model_dir) {
                Ok(encoder) => Some(std::sync::Arc::new(encoder)),
                Err(e) => {
                    warn!(error = %e, "sentence encoder unavailable, using heuristic similarity");
                    None
                }
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn model_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("models")
            .join("all-MiniLM-L6-v2")
    }

    #[test]
    fn missing_model_dir_disables_handle_permanently() {
        let handle = EncoderHandle::new("/nonexistent/model/dir");
        assert!(handle.get().is_none());
        // Second call hits the cached answer, not the filesystem.
        assert!(handle.get().is_none());
    }

    #[test]
    fn related_texts_score_higher_when_model_present() {
        let dir = model_dir();
        if !dir.join("model.onnx").exists() {
            eprintln!("model not present, skipping");
            return;
        }
        let encoder = SentenceEncoder::load(&dir).unwrap();
        assert_eq!(encoder.dim(), 384);

        let close = encoder
            .similarity(
                "Issuers of asset-referenced tokens must publish a whitepaper",
                "A whitepaper is required before offering asset-referenced tokens",
            )
            .unwrap();
        let far = encoder
            .similarity(
                "Issuers of asset-referenced tokens must publish a whitepaper",
                "Lighthouse keepers maintain the lamp room",
            )
            .unwrap();
        assert!(close > far, "close={close:.3} far={far:.3}");
    }
}
