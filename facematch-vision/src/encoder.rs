use image::DynamicImage;
use ndarray::{Array1, ArrayView1};
use serde::Serialize;
use thiserror::Error;

/// Face embedding: one face's position in the recognizer's metric space.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.vector.view()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.iter().copied().collect()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::from_vec(values)
    }
}

/// Why an image could not be turned into an embedding.
///
/// All variants are recoverable: the caller should ask for another image.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum EncodingFailure {
    #[error("image could not be decoded: {0}")]
    DecodeError(String),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("face detected but no embedding could be derived: {0}")]
    EncodingError(String),
}

/// Turns raw image bytes into exactly one embedding.
///
/// When several faces are present the implementation picks one; it never
/// returns more than one embedding per call.
pub trait FaceEncoder {
    fn encode(&mut self, image: &[u8]) -> Result<Embedding, EncodingFailure>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for &mut E {
    fn encode(&mut self, image: &[u8]) -> Result<Embedding, EncodingFailure> {
        (**self).encode(image)
    }
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn encode(&mut self, image: &[u8]) -> Result<Embedding, EncodingFailure> {
        (**self).encode(image)
    }
}

/// Decode JPEG/PNG bytes, reporting any decoder error as `DecodeError`.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EncodingFailure> {
    image::load_from_memory(bytes).map_err(|e| EncodingFailure::DecodeError(e.to_string()))
}
