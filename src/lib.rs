pub mod config;
pub mod distance;
pub mod matcher;
pub mod policy;
pub mod storage;

// Re-export vision types for convenience
pub use facematch_vision::{Embedding, EncodingFailure, FaceEncoder};
#[cfg(feature = "onnx")]
pub use facematch_vision::Pipeline;

pub use matcher::{MatchError, Matcher};
pub use policy::{MatchOutcome, MatchPolicy, MATCH_THRESHOLD};
pub use storage::{
    CachedStore, EnrollmentRecord, EnrollmentStore, FileStore, ImageStore, MemoryStore, StoreError,
};
