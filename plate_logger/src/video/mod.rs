//! OpenCV boundary: capture, model inference and annotated output. Everything
//! past this module works on `RgbImage`.

pub mod bounding_box_render;
pub mod object_detector;
pub mod quad_detector;
pub mod video_reader;

use image::RgbImage;
use opencv::core::{Mat, Scalar, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

use crate::error::ModelError;

/// BGR capture frame to an owned RGB image.
pub fn bgr_to_rgb_image(mat: &Mat) -> opencv::Result<Option<RgbImage>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let data = rgb.data_bytes()?.to_vec();
    Ok(RgbImage::from_raw(rgb.cols() as u32, rgb.rows() as u32, data))
}

/// Copies an RGB image into a 3-channel Mat, keeping RGB order.
pub fn rgb_image_to_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

pub(crate) fn inference_error(err: opencv::Error) -> ModelError {
    ModelError::Inference(err.to_string())
}
