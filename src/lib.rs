pub mod audit;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod maintenance;
pub mod matcher;
pub mod registration;
pub mod storage;

// Re-export vision types for convenience
pub use attendrs_vision::{FaceImage, FusionWeights, PairScorer, SimilarityConfig};
pub use error::{GateError, GateResult};
pub use gate::{BlockReason, Evaluation, ReviewReason, SimilarityGate, Verdict};
pub use storage::{CandidateSet, DirectoryStore, FaceImageSource, Gallery, LoadedFace, StudentId};
