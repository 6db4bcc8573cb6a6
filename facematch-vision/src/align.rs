use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

use crate::detect::Detection;

/// Eye positions in the canonical 112x112 ArcFace crop.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);
const REF_SIZE: f32 = 112.0;

/// Similarity transform `out = [a b; -b a] * in + t`.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Result<Self> {
        let (dx, dy) = (right.0 - left.0, right.1 - left.1);
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if !eye_dist.is_finite() || eye_dist <= f32::EPSILON {
            bail!("degenerate eye landmarks");
        }
        let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
            + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
        .sqrt();
        let out_scale = size as f32 / REF_SIZE;
        let scale = out_scale * ref_dist / eye_dist;
        let angle = dy.atan2(dx);
        let (a, b) = (scale * angle.cos(), scale * angle.sin());

        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * out_scale,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * out_scale,
        );
        Ok(Self {
            a,
            b,
            tx: target.0 - (a * center.0 + b * center.1),
            ty: target.1 - (-b * center.0 + a * center.1),
        })
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let (px, py) = (x - self.tx, y - self.ty);
        let det = self.a * self.a + self.b * self.b;
        ((self.a * px - self.b * py) / det, (self.b * px + self.a * py) / det)
    }
}

fn sample_bilinear(img: &DynamicImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);
    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let v: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *out = v.clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(rgb))
}

/// Rotate, scale and crop the face so the eyes land on the reference points.
/// Pixels falling outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    let transform = Similarity::from_eyes((lm[0], lm[1]), (lm[2], lm[3]), size)?;

    let mut out = RgbImage::new(size, size);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(v) = sample_bilinear(img, sx, sy) {
            *px = v;
        }
    }
    Ok(DynamicImage::ImageRgb8(out))
}
