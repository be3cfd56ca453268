//! ML inference layer: ONNX Runtime sentence embeddings and NLI
//! classification for the verification tiers that can use them.
//!
//! Everything here is optional. The verification engine carries heuristic
//! fallbacks for both concerns; this crate only raises scoring quality when
//! a model is present on disk and the `onnx` feature is enabled.

#[cfg(feature = "onnx")]
mod encoder;
#[cfg(feature = "onnx")]
mod nli;

#[cfg(feature = "onnx")]
pub use encoder::{EncoderHandle, SentenceEncoder};
#[cfg(feature = "onnx")]
pub use nli::{NliHandle, NliScores, NliSession};
