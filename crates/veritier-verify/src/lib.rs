//! Five-tier rule consistency verification.
//!
//! Tier 0 validates rule structure, tier 1 compares rule and source text
//! lexically, tier 2 scores semantic similarity, tier 3 checks entailment,
//! and tier 4 checks coherence across related rules. Tiers 2 and 3 use
//! optional ML backends (feature `onnx`) and fall back to deterministic
//! heuristics when none is available.

pub mod cross_rule;
pub mod engine;
pub mod nli;
pub mod similarity;
pub mod text;
pub mod tier0;
pub mod tier1;
pub mod tier2;
pub mod tier3;

pub use cross_rule::{
    ContradictionResult, ContradictionSeverity, CrossRuleChecker, HierarchyResult, TemporalResult,
};
pub use engine::{ConsistencyEngine, VerificationTier};
pub use nli::{EntailmentClassifier, NliBackend, NliLabel, NliResult};
pub use similarity::{EmbeddingBackend, Similarity, SimilarityLabel, SimilarityScorer};
pub use tier0::StructuralChecker;
pub use tier1::LexicalChecker;
pub use tier2::SemanticChecker;
pub use tier3::EntailmentChecker;
