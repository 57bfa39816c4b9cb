use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::plate_detection::imaging::encode_jpeg_base64;
use crate::plate_detection::{TrackId, VehicleType};

/// One logical document per (track_id, vehicle_type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    pub track_id: TrackId,
    pub vehicle_type: VehicleType,
    #[serde(rename = "plate")]
    pub plate_text: String,
    pub vehicle_confidence: f32,
    pub ocr_confidence: f32,
    /// Base64 JPEG of the vehicle crop.
    #[serde(rename = "image_base64")]
    pub vehicle_image: String,
    pub timestamp: DateTime<Utc>,
}

impl PersistenceRecord {
    pub fn key(&self) -> (TrackId, VehicleType) {
        (self.track_id, self.vehicle_type)
    }
}

/// Write intent produced while a frame is processed. Encoding is deferred
/// until the batch is flushed.
#[derive(Debug, Clone)]
pub struct PersistenceRequest {
    pub track_id: TrackId,
    pub vehicle_type: VehicleType,
    pub plate_text: String,
    pub vehicle_confidence: f32,
    pub ocr_confidence: f32,
    pub vehicle_image: RgbImage,
}

impl PersistenceRequest {
    pub fn into_record(self, timestamp: DateTime<Utc>) -> Result<PersistenceRecord, PersistenceError> {
        Ok(PersistenceRecord {
            track_id: self.track_id,
            vehicle_type: self.vehicle_type,
            plate_text: self.plate_text,
            vehicle_confidence: self.vehicle_confidence,
            ocr_confidence: self.ocr_confidence,
            vehicle_image: encode_jpeg_base64(&self.vehicle_image)?,
            timestamp,
        })
    }
}
