//! YuNet post-processing.
//!
//! YuNet is anchor-free: every grid cell of the stride-8/16/32 feature maps
//! predicts a score, a box and five landmarks relative to the cell itself.
//! The network emits 12 tensors in the order
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, .., kps_32`,
//! each shaped `[1, cells, channels]`.

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array2, Array4, ArrayView2};

pub const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // eyes, nose tip, mouth corners as x,y pairs
}

/// How the source image was placed on the square detector canvas.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x * INPUT_SIZE as f32 - self.offset_x) / self.scale,
            (y * INPUT_SIZE as f32 - self.offset_y) / self.scale,
        )
    }
}

/// Pad-and-resize `img` into a `[1, 3, 640, 640]` BGR tensor.
pub fn prepare_input(img: &DynamicImage) -> Result<(Array4<f32>, Letterbox)> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        bail!("empty image");
    }
    let scale = INPUT_SIZE as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale) as u32).max(1);
    let new_h = ((height as f32 * scale) as u32).max(1);
    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);

    let offset_x = (INPUT_SIZE - new_w) / 2;
    let offset_y = (INPUT_SIZE - new_h) / 2;
    let mut canvas = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let tensor = bgr_planar(&canvas, INPUT_SIZE)?;
    Ok((
        tensor,
        Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
        },
    ))
}

/// Convert a `size`x`size` image into a planar BGR tensor with raw 0-255 values.
pub fn bgr_planar(img: &DynamicImage, size: u32) -> Result<Array4<f32>> {
    let rgb = img.to_rgb8();
    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in rgb.as_raw().chunks_exact(3).take(plane).enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }
    Array4::from_shape_vec((1, 3, size as usize, size as usize), data)
        .context("building input tensor")
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-stride tensors after shape validation.
pub struct StrideOutputs {
    pub scores: Vec<Array2<f32>>,
    pub boxes: Vec<Array2<f32>>,
    pub landmarks: Vec<Array2<f32>>,
}

fn tensor_at(
    outputs: &[(Vec<i64>, Vec<f32>)],
    idx: usize,
    cells: usize,
    channels: usize,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(idx)
        .with_context(|| format!("missing detector output {idx}"))?;
    if shape.as_slice() != [1, cells as i64, channels as i64] {
        bail!("detector output {idx} has shape {shape:?}, expected [1, {cells}, {channels}]");
    }
    Ok(Array2::from_shape_vec((cells, channels), data.clone())?)
}

/// Validate the 12 raw tensors and combine `cls * obj` into sigmoid scores.
pub fn parse_outputs(outputs: &[(Vec<i64>, Vec<f32>)]) -> Result<StrideOutputs> {
    let mut parsed = StrideOutputs {
        scores: Vec::new(),
        boxes: Vec::new(),
        landmarks: Vec::new(),
    };
    for (i, stride) in STRIDES.iter().enumerate() {
        let side = INPUT_SIZE as usize / stride;
        let cells = side * side;
        let cls = tensor_at(outputs, i, cells, 1)?;
        let obj = tensor_at(outputs, i + 3, cells, 1)?;
        let mut score = cls * obj;
        score.mapv_inplace(sigmoid);
        parsed.scores.push(score);
        parsed.boxes.push(tensor_at(outputs, i + 6, cells, 4)?);
        parsed.landmarks.push(tensor_at(outputs, i + 9, cells, 10)?);
    }
    Ok(parsed)
}

fn decode_stride(
    stride: usize,
    scores: ArrayView2<f32>,
    boxes: ArrayView2<f32>,
    landmarks: ArrayView2<f32>,
    score_threshold: f32,
    out: &mut Vec<Detection>,
) {
    let side = INPUT_SIZE as usize / stride;
    let norm = stride as f32 / INPUT_SIZE as f32;
    for row in 0..side {
        for col in 0..side {
            let idx = row * side + col;
            let score = scores[[idx, 0]];
            if score < score_threshold {
                continue;
            }
            let cx = (col as f32 + boxes[[idx, 0]]) * norm;
            let cy = (row as f32 + boxes[[idx, 1]]) * norm;
            let w = boxes[[idx, 2]] * norm;
            let h = boxes[[idx, 3]] * norm;

            let mut lms = [0.0f32; 10];
            for k in 0..5 {
                lms[k * 2] = (col as f32 + landmarks[[idx, k * 2]]) * norm;
                lms[k * 2 + 1] = (row as f32 + landmarks[[idx, k * 2 + 1]]) * norm;
            }
            out.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks: lms,
            });
        }
    }
}

/// Grid-decode all strides. Coordinates are normalized to the 640 canvas.
pub fn decode(parsed: &StrideOutputs, score_threshold: f32) -> Vec<Detection> {
    let mut detections = Vec::new();
    for (i, &stride) in STRIDES.iter().enumerate() {
        decode_stride(
            stride,
            parsed.scores[i].view(),
            parsed.boxes[i].view(),
            parsed.landmarks[i].view(),
            score_threshold,
            &mut detections,
        );
    }
    detections
}

/// Map normalized canvas detections back onto the source image.
pub fn to_source(detections: Vec<Detection>, letterbox: &Letterbox) -> Vec<Detection> {
    detections
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.to_source(d.bbox[0], d.bbox[1]);
            let w = d.bbox[2] * INPUT_SIZE as f32 / letterbox.scale;
            let h = d.bbox[3] * INPUT_SIZE as f32 / letterbox.scale;
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                let (lx, ly) = letterbox.to_source(d.landmarks[k * 2], d.landmarks[k * 2 + 1]);
                landmarks[k * 2] = lx;
                landmarks[k * 2 + 1] = ly;
            }
            Detection {
                bbox: [x, y, w, h],
                score: d.score,
                landmarks,
            }
        })
        .collect()
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Non-maximum suppression. The result is ordered by descending score,
/// ties kept in input order.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    fn empty_outputs() -> StrideOutputs {
        let mut out = StrideOutputs {
            scores: Vec::new(),
            boxes: Vec::new(),
            landmarks: Vec::new(),
        };
        for stride in STRIDES {
            let cells = (INPUT_SIZE as usize / stride).pow(2);
            out.scores.push(Array2::zeros((cells, 1)));
            out.boxes.push(Array2::zeros((cells, 4)));
            out.landmarks.push(Array2::zeros((cells, 10)));
        }
        out
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let v = iou(&a, &b);
        assert!(v > 0.0 && v < 1.0);
        assert_eq!(iou(&a, &[100.0, 100.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn test_nms_keeps_disjoint_and_orders_by_score() {
        let kept = nms(
            vec![
                det([12.0, 12.0, 20.0, 20.0], 0.8),
                det([10.0, 10.0, 20.0, 20.0], 0.9),
                det([100.0, 100.0, 20.0, 20.0], 0.85),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn test_decode_single_cell_stride_32() {
        let mut parsed = empty_outputs();
        // cell (row 10, col 10) on the 20x20 grid
        let idx = 10 * 20 + 10;
        parsed.scores[2][[idx, 0]] = 0.9;
        parsed.boxes[2][[idx, 0]] = 0.5;
        parsed.boxes[2][[idx, 1]] = 0.3;
        parsed.boxes[2][[idx, 2]] = 4.0;
        parsed.boxes[2][[idx, 3]] = 4.0;

        let found = decode(&parsed, 0.5);
        assert_eq!(found.len(), 1);
        let d = &found[0];
        // center (10.5 * 32, 10.3 * 32) / 640, size 4 * 32 / 640
        assert!((d.bbox[0] - 0.425).abs() < 1e-5);
        assert!((d.bbox[1] - 0.415).abs() < 1e-5);
        assert!((d.bbox[2] - 0.2).abs() < 1e-5);
        assert!((d.bbox[3] - 0.2).abs() < 1e-5);
        assert!((d.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((d.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_below_threshold_is_empty() {
        assert!(decode(&empty_outputs(), 0.5).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back() {
        let lb = Letterbox {
            scale: 0.5,
            offset_x: 0.0,
            offset_y: 160.0,
        };
        let mapped = to_source(vec![det([0.25, 0.5, 0.1, 0.1], 0.9)], &lb);
        // 0.25 * 640 / 0.5 = 320, (0.5 * 640 - 160) / 0.5 = 320
        assert!((mapped[0].bbox[0] - 320.0).abs() < 1e-3);
        assert!((mapped[0].bbox[1] - 320.0).abs() < 1e-3);
        assert!((mapped[0].bbox[2] - 128.0).abs() < 1e-3);
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        let outputs = vec![(vec![1, 3, 1], vec![0.0; 3])];
        assert!(parse_outputs(&outputs).is_err());
    }

    #[test]
    fn test_prepare_input_shape() {
        let img = DynamicImage::new_rgb8(320, 160);
        let (tensor, lb) = prepare_input(&img).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.scale, 2.0);
        assert_eq!(lb.offset_y, 160.0);
    }
}
