use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT};
use tracing::{debug, info};

use super::bgr_to_rgb_image;
use crate::error::PipelineError;

pub struct VideoReader {
    capture: VideoCapture,
    fps_control: Instant,
    fps_wait: Option<Duration>,
    source_fps: f64,
    frames_read: u64,
}

fn input_error(path: &str, err: opencv::Error) -> PipelineError {
    PipelineError::InputUnavailable(format!("{path}: {err}"))
}

impl VideoReader {
    /// Opens a file or stream. `max_fps <= 0` reads as fast as frames decode.
    pub fn open(path: &str, max_fps: f64) -> Result<Self, PipelineError> {
        let capture = VideoCapture::from_file(path, CAP_ANY).map_err(|e| input_error(path, e))?;
        if !capture.is_opened().map_err(|e| input_error(path, e))? {
            return Err(PipelineError::InputUnavailable(format!("{path}: cannot open")));
        }

        let source_fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        let frame_count = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        info!(
            "Opened {} ({:.1} fps, {} frames)",
            path, source_fps, frame_count as i64
        );

        let fps_wait = (max_fps > 0.0).then(|| Duration::from_secs_f64(1.0 / max_fps));
        Ok(Self {
            capture,
            fps_control: Instant::now(),
            fps_wait,
            source_fps,
            frames_read: 0,
        })
    }

    /// Frame rate reported by the container, or `fallback` when unknown.
    pub fn fps_or(&self, fallback: f64) -> f64 {
        if self.source_fps > 0.0 {
            self.source_fps
        } else {
            fallback
        }
    }

    /// `Ok(None)` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>, PipelineError> {
        let mut image = Mat::default();
        let grabbed = self
            .capture
            .read(&mut image)
            .map_err(|e| PipelineError::InputUnavailable(e.to_string()))?;
        if !grabbed || image.empty() {
            debug!("End of stream after {} frames", self.frames_read);
            return Ok(None);
        }

        let frame = bgr_to_rgb_image(&image)
            .map_err(|e| PipelineError::InputUnavailable(e.to_string()))?
            .ok_or_else(|| PipelineError::InputUnavailable("frame buffer size mismatch".into()))?;
        self.frames_read += 1;

        if let Some(wait) = self.fps_wait {
            let elapsed = self.fps_control.elapsed();
            if wait > elapsed {
                thread::sleep(wait - elapsed);
            }
            self.fps_control = Instant::now();
        }
        Ok(Some(frame))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

unsafe impl Send for VideoReader {}
