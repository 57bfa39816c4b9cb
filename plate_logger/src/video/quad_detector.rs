use image::RgbImage;
use opencv::core::{Mat, Point, Size, Vector, BORDER_DEFAULT};
use opencv::imgproc;

use super::{inference_error, rgb_image_to_mat};
use crate::error::ModelError;
use crate::plate_detection::alignment::{Quad, QuadDetector};

/// Finds the plate outline as the largest four-cornered contour of an Otsu
/// binarization.
#[derive(Debug, Clone, Copy)]
pub struct ContourQuadDetector {
    /// Smallest accepted quad, as a fraction of the crop area.
    pub min_area_ratio: f64,
}

impl Default for ContourQuadDetector {
    fn default() -> Self {
        Self { min_area_ratio: 0.3 }
    }
}

impl QuadDetector for ContourQuadDetector {
    fn detect_quad(&self, plate: &RgbImage) -> Result<Option<Quad>, ModelError> {
        let rgb = rgb_image_to_mat(plate).map_err(inference_error)?;
        let mut gray = Mat::default();
        imgproc::cvt_color(&rgb, &mut gray, imgproc::COLOR_RGB2GRAY, 0).map_err(inference_error)?;
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(&gray, &mut blurred, Size::new(5, 5), 0.0, 0.0, BORDER_DEFAULT)
            .map_err(inference_error)?;
        let mut binary = Mat::default();
        imgproc::threshold(
            &blurred,
            &mut binary,
            0.0,
            255.0,
            imgproc::THRESH_BINARY | imgproc::THRESH_OTSU,
        )
        .map_err(inference_error)?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &binary,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::default(),
        )
        .map_err(inference_error)?;

        let min_area = self.min_area_ratio * (plate.width() * plate.height()) as f64;
        let mut best: Option<(f64, Vector<Point>)> = None;
        for contour in contours.iter() {
            let perimeter = imgproc::arc_length(&contour, true).map_err(inference_error)?;
            let mut approx = Vector::<Point>::new();
            imgproc::approx_poly_dp(&contour, &mut approx, 0.02 * perimeter, true).map_err(inference_error)?;
            if approx.len() != 4 {
                continue;
            }
            let area = imgproc::contour_area(&approx, false).map_err(inference_error)?;
            if area < min_area || best.as_ref().is_some_and(|(a, _)| *a >= area) {
                continue;
            }
            best = Some((area, approx));
        }

        Ok(best.map(|(_, approx)| {
            let mut points = [(0.0f32, 0.0f32); 4];
            for (slot, p) in points.iter_mut().zip(approx.iter()) {
                *slot = (p.x as f32, p.y as f32);
            }
            Quad::new(points).ordered()
        }))
    }
}
