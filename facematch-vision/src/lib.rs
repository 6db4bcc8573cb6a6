pub mod align;
pub mod detect;
pub mod encoder;
#[cfg(feature = "onnx")]
pub mod model;
#[cfg(feature = "onnx")]
pub mod pipeline;

// Re-export commonly used types
pub use detect::Detection;
pub use encoder::{decode_image, Embedding, EncodingFailure, FaceEncoder};
#[cfg(feature = "onnx")]
pub use pipeline::Pipeline;

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";
