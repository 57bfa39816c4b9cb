use image::RgbImage;
use opencv::core::{Mat, Point, Rect, Scalar, Size};
use opencv::imgproc::{self, put_text, rectangle, FONT_HERSHEY_PLAIN, LINE_4, LINE_8};
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use tracing::{info, warn};

use super::rgb_image_to_mat;
use crate::error::PipelineError;
use crate::plate_detection::VehicleLabel;

const HEADER_HEIGHT: i32 = 20;

fn output_error(err: opencv::Error) -> PipelineError {
    PipelineError::OutputUnavailable(err.to_string())
}

/// Draws one box and caption per label and appends the frame to a video file.
pub struct BoundingBoxRender {
    writer: VideoWriter,
    frame_size: Size,
    frames_written: u64,
}

impl BoundingBoxRender {
    pub fn with_save_to_file(
        path: &str,
        fourcc: &str,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, PipelineError> {
        let code: Vec<char> = fourcc.chars().collect();
        let [c1, c2, c3, c4] = code[..] else {
            return Err(PipelineError::OutputUnavailable(format!(
                "fourcc must have four characters, got {fourcc:?}"
            )));
        };
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::OutputUnavailable(format!("{path}: {e}")))?;
            }
        }

        let frame_size = Size::new(width as i32, height as i32);
        let writer = VideoWriter::new(
            path,
            VideoWriter::fourcc(c1, c2, c3, c4).map_err(output_error)?,
            fps,
            frame_size,
            true,
        )
        .map_err(output_error)?;
        if !writer.is_opened().map_err(output_error)? {
            return Err(PipelineError::OutputUnavailable(format!("{path}: cannot open writer")));
        }
        info!("Writing annotated video to {} ({}x{} @ {:.1} fps)", path, width, height, fps);

        Ok(Self {
            writer,
            frame_size,
            frames_written: 0,
        })
    }

    pub fn render(&mut self, frame: &RgbImage, labels: &[VehicleLabel]) -> Result<(), PipelineError> {
        let rgb = rgb_image_to_mat(frame).map_err(output_error)?;
        let mut image = Mat::default();
        imgproc::cvt_color(&rgb, &mut image, imgproc::COLOR_RGB2BGR, 0).map_err(output_error)?;

        let box_color = Scalar::from((0.0, 255.0, 0.0));
        let header_color = Scalar::from((255.0, 0.0, 0.0));
        let text_color = Scalar::from((255.0, 255.0, 255.0));

        for label in labels {
            let Some((x, y, w, h)) = label.bbox.pixel_rect(frame.width(), frame.height()) else {
                continue;
            };
            let car = Rect::new(x as i32, y as i32, w as i32, h as i32);
            let header = Rect::new(car.x, (car.y - HEADER_HEIGHT).max(0), car.width, HEADER_HEIGHT);

            rectangle(&mut image, header, header_color, -1, LINE_4, 0).map_err(output_error)?;
            rectangle(&mut image, car, box_color, 2, LINE_4, 0).map_err(output_error)?;
            put_text(
                &mut image,
                &label.caption(),
                Point::new(header.x + 2, header.y + HEADER_HEIGHT - 4),
                FONT_HERSHEY_PLAIN,
                1.2,
                text_color,
                1,
                LINE_8,
                false,
            )
            .map_err(output_error)?;
        }

        if image.size().map_err(output_error)? != self.frame_size {
            warn!("Frame size changed mid-stream, resizing for the writer");
            let mut resized = Mat::default();
            imgproc::resize(&image, &mut resized, self.frame_size, 0.0, 0.0, imgproc::INTER_LINEAR)
                .map_err(output_error)?;
            image = resized;
        }

        self.writer.write(&image).map_err(output_error)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for BoundingBoxRender {
    fn drop(&mut self) {
        if let Err(err) = self.writer.release() {
            warn!("Cannot release video writer: {}", err);
        }
    }
}

unsafe impl Send for BoundingBoxRender {}
