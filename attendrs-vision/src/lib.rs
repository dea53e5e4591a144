pub mod error;
pub mod face;
pub mod pipeline;
pub mod similarity;

// Re-export commonly used types
pub use error::VisionError;
pub use face::FaceImage;
pub use pipeline::{FusionWeights, MethodScores, PairScore, PairScorer, PreparedFace, SimilarityConfig};
