//! Perspective correction of plate crops.
//!
//! A text-region detector proposes the plate's four corners; the crop is then
//! warped so those corners land on a fixed-size rectangle.

use image::{Rgb, RgbImage};
use nalgebra::{SMatrix, SVector};

use crate::error::{AlignmentError, ModelError};

pub const ALIGNED_WIDTH: u32 = 240;
pub const ALIGNED_HEIGHT: u32 = 80;

const MIN_QUAD_AREA: f32 = 1.0;

/// Four corners in pixel coordinates of the plate crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub points: [(f32, f32); 4],
}

impl Quad {
    pub fn new(points: [(f32, f32); 4]) -> Self {
        Self { points }
    }

    /// Corners reordered as top-left, top-right, bottom-right, bottom-left.
    pub fn ordered(&self) -> Quad {
        let p = &self.points;
        let by = |key: &dyn Fn(&(f32, f32)) -> f32, max: bool| {
            let mut best = p[0];
            for q in p.iter().skip(1) {
                let better = if max { key(q) > key(&best) } else { key(q) < key(&best) };
                if better {
                    best = *q;
                }
            }
            best
        };
        let sum = |q: &(f32, f32)| q.0 + q.1;
        let diff = |q: &(f32, f32)| q.1 - q.0;
        Quad::new([by(&sum, false), by(&diff, false), by(&sum, true), by(&diff, true)])
    }

    /// Shoelace area.
    pub fn area(&self) -> f32 {
        let p = &self.points;
        let mut twice = 0.0;
        for i in 0..4 {
            let (x1, y1) = p[i];
            let (x2, y2) = p[(i + 1) % 4];
            twice += x1 * y2 - x2 * y1;
        }
        twice.abs() / 2.0
    }
}

/// External detector proposing the plate text quadrilateral.
pub trait QuadDetector: Send + Sync {
    fn detect_quad(&self, plate: &RgbImage) -> Result<Option<Quad>, ModelError>;
}

/// Used when no text-region model is configured; alignment always falls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoQuadDetector;

impl QuadDetector for NoQuadDetector {
    fn detect_quad(&self, _plate: &RgbImage) -> Result<Option<Quad>, ModelError> {
        Ok(None)
    }
}

/// Homography mapping output rectangle coordinates onto the source quad.
fn rect_to_quad(quad: &Quad, width: u32, height: u32) -> Result<SMatrix<f64, 3, 3>, AlignmentError> {
    let (w, h) = ((width - 1) as f64, (height - 1) as f64);
    let rect = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (&(u, v), &(x, y))) in rect.iter().zip(quad.points.iter()).enumerate() {
        let (x, y) = (x as f64, y as f64);
        let r = 2 * i;
        a.set_row(r, &SMatrix::<f64, 1, 8>::from_row_slice(&[u, v, 1.0, 0.0, 0.0, 0.0, -u * x, -v * x]));
        a.set_row(r + 1, &SMatrix::<f64, 1, 8>::from_row_slice(&[0.0, 0.0, 0.0, u, v, 1.0, -u * y, -v * y]));
        b[r] = x;
        b[r + 1] = y;
    }

    let h = a.lu().solve(&b).ok_or(AlignmentError::Singular)?;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(AlignmentError::Singular);
    }
    Ok(SMatrix::<f64, 3, 3>::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if x < -0.5 || y < -0.5 || x > w - 0.5 || y > h - 0.5 {
        return Rgb([0, 0, 0]);
    }
    let (x, y) = (x.clamp(0.0, w - 1.0), y.clamp(0.0, h - 1.0));
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warps `plate` so that `quad` fills a `width` x `height` image.
pub fn warp_to_rect(plate: &RgbImage, quad: &Quad, width: u32, height: u32) -> Result<RgbImage, AlignmentError> {
    if quad.points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(AlignmentError::NonFinite);
    }
    let quad = quad.ordered();
    let area = quad.area();
    if area < MIN_QUAD_AREA || width < 2 || height < 2 || plate.width() == 0 || plate.height() == 0 {
        return Err(AlignmentError::Degenerate(area));
    }

    let m = rect_to_quad(&quad, width, height)?;
    let mut out = RgbImage::new(width, height);
    for (u, v, pixel) in out.enumerate_pixels_mut() {
        let (uf, vf) = (u as f64, v as f64);
        let den = m[(2, 0)] * uf + m[(2, 1)] * vf + m[(2, 2)];
        if den.abs() < f64::EPSILON {
            continue;
        }
        let x = (m[(0, 0)] * uf + m[(0, 1)] * vf + m[(0, 2)]) / den;
        let y = (m[(1, 0)] * uf + m[(1, 1)] * vf + m[(1, 2)]) / den;
        *pixel = sample_bilinear(plate, x, y);
    }
    Ok(out)
}

/// Detects the text quadrilateral on `plate` and warps it to the aligned size.
pub fn align_plate(
    plate: &RgbImage,
    detector: &dyn QuadDetector,
    width: u32,
    height: u32,
) -> Result<RgbImage, AlignmentError> {
    let quad = detector
        .detect_quad(plate)
        .map_err(|e| AlignmentError::Detector(e.to_string()))?
        .ok_or(AlignmentError::NotFound)?;
    warp_to_rect(plate, &quad, width, height)
}
