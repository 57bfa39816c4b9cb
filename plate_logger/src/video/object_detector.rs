use std::sync::Mutex;

use image::RgbImage;
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_32F};
use opencv::dnn::{self, blob_from_image, nms_boxes, Net};
use opencv::dnn::{DNN_BACKEND_CUDA, DNN_BACKEND_OPENCV, DNN_TARGET_CPU, DNN_TARGET_CUDA};
use opencv::prelude::*;
use tracing::{debug, info};

use super::{inference_error, rgb_image_to_mat};
use crate::error::ModelError;
use crate::plate_detection::localizer::{CharacterDetector, DetectionThresholds, PlateRegion, PlateRegionDetector};
use crate::plate_detection::{BBox, CharacterDetection, VehicleType};
use crate::tracking::{Detection, VehicleDetector};

/// One box out of the network, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub bbox: BBox,
    pub confidence: f32,
}

/// YOLOv8 ONNX model run through the OpenCV DNN module. Output is a
/// `[1, 4 + classes, anchors]` tensor of center-size boxes and class scores.
pub struct ObjectDetector {
    classifier: Mutex<Net>,
    input_size: i32,
    classes: Vec<String>,
}

impl ObjectDetector {
    pub fn from_onnx(path: &str, input_size: i32, classes: Vec<String>, use_gpu: bool) -> Result<Self, ModelError> {
        let not_loaded = |e: opencv::Error| ModelError::NotLoaded(format!("{path}: {e}"));
        let mut classifier = dnn::read_net_from_onnx(path).map_err(not_loaded)?;

        if use_gpu {
            classifier.set_preferable_backend(DNN_BACKEND_CUDA).map_err(not_loaded)?;
            classifier.set_preferable_target(DNN_TARGET_CUDA).map_err(not_loaded)?;
        } else {
            classifier.set_preferable_backend(DNN_BACKEND_OPENCV).map_err(not_loaded)?;
            classifier.set_preferable_target(DNN_TARGET_CPU).map_err(not_loaded)?;
        }
        info!("Loaded {} ({} classes, input {})", path, classes.len(), input_size);

        Ok(Self {
            classifier: Mutex::new(classifier),
            input_size,
            classes,
        })
    }

    pub fn class_name(&self, class_id: usize) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    pub fn detect(&self, image: &RgbImage, thresholds: DetectionThresholds) -> Result<Vec<RawDetection>, ModelError> {
        let input = rgb_image_to_mat(image).map_err(inference_error)?;
        // Already RGB, no channel swap.
        let mut blob = blob_from_image(
            &input,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            false,
            false,
            CV_32F,
        )
        .map_err(inference_error)?;

        let mut outputs = Vector::<Mat>::default();
        {
            let mut classifier = self
                .classifier
                .lock()
                .map_err(|_| ModelError::Inference("network lock poisoned".into()))?;
            classifier
                .set_input(&mut blob, "", 1.0, Scalar::default())
                .map_err(inference_error)?;
            let output_names = classifier.get_unconnected_out_layers_names().map_err(inference_error)?;
            classifier.forward(&mut outputs, &output_names).map_err(inference_error)?;
        }

        let output = outputs
            .get(0)
            .map_err(|_| ModelError::Inference("network produced no output".into()))?;
        self.post_process(image.width(), image.height(), &output, thresholds)
    }

    fn post_process(
        &self,
        img_cols: u32,
        img_rows: u32,
        output: &Mat,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<RawDetection>, ModelError> {
        let rows = 4 + self.classes.len();
        let anchors = output.total() / rows;
        let x_factor = img_cols as f32 / self.input_size as f32;
        let y_factor = img_rows as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for j in 0..anchors as i32 {
            let mut best = (0usize, 0.0f32);
            for c in 0..self.classes.len() {
                let score = *output.at_3d::<f32>(0, (4 + c) as i32, j).map_err(inference_error)?;
                if score > best.1 {
                    best = (c, score);
                }
            }
            if best.1 < thresholds.confidence {
                continue;
            }

            let cx = *output.at_3d::<f32>(0, 0, j).map_err(inference_error)?;
            let cy = *output.at_3d::<f32>(0, 1, j).map_err(inference_error)?;
            let w = *output.at_3d::<f32>(0, 2, j).map_err(inference_error)?;
            let h = *output.at_3d::<f32>(0, 3, j).map_err(inference_error)?;
            let bbox = BBox::new(
                (cx - 0.5 * w) * x_factor,
                (cy - 0.5 * h) * y_factor,
                (cx + 0.5 * w) * x_factor,
                (cy + 0.5 * h) * y_factor,
            );
            candidates.push(RawDetection {
                class_id: best.0,
                bbox,
                confidence: best.1,
            });
        }

        // Class-aware NMS: shift every class into its own region of the plane.
        let offset = img_cols.max(img_rows) as i32 + 1;
        let mut boxes = Vector::<Rect>::default();
        let mut confidences = Vector::<f32>::default();
        for candidate in &candidates {
            let b = candidate.bbox;
            let shift = candidate.class_id as i32 * offset;
            boxes.push(Rect::new(
                b.x1 as i32 + shift,
                b.y1 as i32,
                b.width() as i32,
                b.height() as i32,
            ));
            confidences.push(candidate.confidence);
        }

        let mut indices = Vector::<i32>::default();
        nms_boxes(
            &boxes,
            &confidences,
            thresholds.confidence,
            thresholds.iou,
            &mut indices,
            1.0,
            0,
        )
        .map_err(inference_error)?;

        let kept: Vec<RawDetection> = indices
            .iter()
            .filter_map(|i| candidates.get(i as usize).copied())
            .collect();
        debug!("{} candidates, {} after NMS", candidates.len(), kept.len());
        Ok(kept)
    }
}

unsafe impl Send for ObjectDetector {}
unsafe impl Sync for ObjectDetector {}

impl VehicleDetector for ObjectDetector {
    fn detect_vehicles(&self, frame: &RgbImage, thresholds: DetectionThresholds) -> Result<Vec<Detection>, ModelError> {
        Ok(self
            .detect(frame, thresholds)?
            .into_iter()
            .map(|d| {
                let vehicle_type = self
                    .class_name(d.class_id)
                    .map(VehicleType::from_label)
                    .unwrap_or(VehicleType::Unknown);
                Detection::new(vehicle_type, d.bbox, d.confidence)
            })
            .collect())
    }
}

impl PlateRegionDetector for ObjectDetector {
    fn detect_regions(&self, vehicle: &RgbImage, thresholds: DetectionThresholds) -> Result<Vec<PlateRegion>, ModelError> {
        Ok(self
            .detect(vehicle, thresholds)?
            .into_iter()
            .map(|d| PlateRegion {
                bbox: d.bbox,
                confidence: d.confidence,
            })
            .collect())
    }
}

impl CharacterDetector for ObjectDetector {
    fn detect_characters(
        &self,
        plate: &RgbImage,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<CharacterDetection>, ModelError> {
        Ok(self
            .detect(plate, thresholds)?
            .into_iter()
            .filter_map(|d| {
                let label = self.class_name(d.class_id)?.chars().next()?.to_ascii_uppercase();
                let b = d.bbox;
                Some(CharacterDetection::new(
                    (b.x1 + b.x2) / 2.0,
                    (b.y1 + b.y2) / 2.0,
                    b.height(),
                    label,
                    d.confidence,
                ))
            })
            .collect())
    }
}
