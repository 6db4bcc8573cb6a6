use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::{
    align,
    detect::{self, Detection},
    encoder::{decode_image, Embedding, EncodingFailure, FaceEncoder},
};

const FACE_SIZE: u32 = 112;

/// ONNX face encoder: YuNet detection, eye alignment, SFace embedding.
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

fn run(session: &mut Session, input: Array4<f32>) -> Result<Vec<(Vec<i64>, Vec<f32>)>> {
    let tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![tensor])?;
    let mut owned = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    Ok(owned)
}

fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
    values
}

impl Pipeline {
    pub fn new(detector_model: &Path, recognizer_model: &Path) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            encoder: crate::model::recog_session(recognizer_model)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }

    /// All faces in the image, strongest first.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = detect::prepare_input(img)?;
        let raw = run(&mut self.detector, input).context("running detector")?;
        let parsed = detect::parse_outputs(&raw)?;
        let found = detect::decode(&parsed, self.score_threshold);
        Ok(detect::nms(
            detect::to_source(found, &letterbox),
            self.nms_threshold,
        ))
    }

    /// SFace embedding of an aligned face crop, L2-normalized.
    pub fn embed(&mut self, face: &DynamicImage) -> Result<Embedding> {
        let face = face.resize_exact(FACE_SIZE, FACE_SIZE, image::imageops::FilterType::Triangle);
        let input = detect::bgr_planar(&face, FACE_SIZE)?;
        let raw = run(&mut self.encoder, input).context("running recognizer")?;
        let (shape, data) = raw
            .into_iter()
            .next()
            .context("recognizer produced no output")?;
        let dim = match shape.as_slice() {
            [_, d] => *d as usize,
            _ => data.len(),
        };
        if dim == 0 || data.len() < dim {
            anyhow::bail!("recognizer output shape {shape:?} holds no embedding");
        }
        let mut values = data;
        values.truncate(dim);
        Ok(Embedding::from_vec(l2_normalize(values)))
    }

    /// Detect, align and embed. Returns the chosen detection with its embedding.
    pub fn process_image(
        &mut self,
        img: &DynamicImage,
    ) -> Result<Option<(Detection, Embedding)>> {
        let detections = self.detect(img).context("detecting faces")?;
        let Some(best) = detections.into_iter().next() else {
            return Ok(None);
        };
        let face = align::align_face(img, &best, FACE_SIZE).context("aligning face")?;
        let embedding = self.embed(&face).context("encoding face")?;
        Ok(Some((best, embedding)))
    }
}

/// Undecodable bytes are `DecodeError` and an image without detections is
/// `NoFaceDetected`. Every other failure, including a detector inference
/// error, is reported as `EncodingError`.
impl FaceEncoder for Pipeline {
    fn encode(&mut self, image: &[u8]) -> Result<Embedding, EncodingFailure> {
        let img = decode_image(image)?;
        let detections = self
            .detect(&img)
            .map_err(|e| EncodingFailure::EncodingError(format!("{e:#}")))?;
        log::debug!("detected {} face(s)", detections.len());
        let best = detections
            .into_iter()
            .next()
            .ok_or(EncodingFailure::NoFaceDetected)?;
        align::align_face(&img, &best, FACE_SIZE)
            .and_then(|face| self.embed(&face))
            .map_err(|e| EncodingFailure::EncodingError(format!("{e:#}")))
    }
}
