use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::alignment::{self, QuadDetector, ALIGNED_HEIGHT, ALIGNED_WIDTH};
use super::assembler::CharacterAssembler;
use super::imaging;
use super::{BBox, CharacterDetection, PlateResult, UnreadableReason, VehicleType};
use crate::error::ModelError;

/// Confidence / NMS-IoU operating point handed to a detection model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl DetectionThresholds {
    pub fn new(confidence: f32, iou: f32) -> Self {
        Self { confidence, iou }
    }
}

/// Candidate plate location inside a vehicle crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateRegion {
    pub bbox: BBox,
    pub confidence: f32,
}

/// External plate-region model.
pub trait PlateRegionDetector: Send + Sync {
    fn detect_regions(
        &self,
        vehicle: &RgbImage,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<PlateRegion>, ModelError>;
}

/// External glyph model.
pub trait CharacterDetector: Send + Sync {
    fn detect_characters(
        &self,
        plate: &RgbImage,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<CharacterDetection>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizerSettings {
    pub region_thresholds: DetectionThresholds,
    pub character_thresholds: DetectionThresholds,
    pub pad_width: f32,
    pub pad_height: f32,
    pub upscale: u32,
    pub aligned_width: u32,
    pub aligned_height: u32,
}

impl Default for LocalizerSettings {
    fn default() -> Self {
        Self {
            region_thresholds: DetectionThresholds::new(0.6, 0.7),
            character_thresholds: DetectionThresholds::new(0.5, 0.7),
            pad_width: 0.10,
            pad_height: 0.15,
            upscale: 4,
            aligned_width: ALIGNED_WIDTH,
            aligned_height: ALIGNED_HEIGHT,
        }
    }
}

/// Finds the plate on a vehicle crop and reads it.
pub struct PlateLocalizer {
    regions: Arc<dyn PlateRegionDetector>,
    characters: Arc<dyn CharacterDetector>,
    quads: Arc<dyn QuadDetector>,
    assembler: CharacterAssembler,
    settings: LocalizerSettings,
}

impl PlateLocalizer {
    pub fn new(
        regions: Arc<dyn PlateRegionDetector>,
        characters: Arc<dyn CharacterDetector>,
        quads: Arc<dyn QuadDetector>,
        assembler: CharacterAssembler,
        settings: LocalizerSettings,
    ) -> Self {
        Self {
            regions,
            characters,
            quads,
            assembler,
            settings,
        }
    }

    pub fn settings(&self) -> &LocalizerSettings {
        &self.settings
    }

    /// Regions are tried in the order the model reports them and the first
    /// accepted read wins. Model failures are logged and count as "nothing
    /// found".
    pub fn locate_and_read(&self, vehicle: &RgbImage, vehicle_type: VehicleType) -> PlateResult {
        let regions = match self
            .regions
            .detect_regions(vehicle, self.settings.region_thresholds)
        {
            Ok(regions) => regions,
            Err(err) => {
                warn!("Plate region detection failed: {}", err);
                Vec::new()
            }
        };

        let mut outcome = PlateResult::Unrecognized(UnreadableReason::DetectionEmpty);
        for region in regions {
            let padded = region
                .bbox
                .padded(self.settings.pad_width, self.settings.pad_height);
            let Some(plate) = imaging::crop(vehicle, &padded) else {
                debug!("Plate region {:?} is outside the vehicle crop", region.bbox);
                continue;
            };

            let result = self.read_plate(&plate, vehicle_type);
            if result.is_recognized() {
                return result;
            }
            outcome = result;
        }
        outcome
    }

    fn read_plate(&self, plate: &RgbImage, vehicle_type: VehicleType) -> PlateResult {
        let aligned = match alignment::align_plate(
            plate,
            self.quads.as_ref(),
            self.settings.aligned_width,
            self.settings.aligned_height,
        ) {
            Ok(aligned) => aligned,
            Err(err) => {
                debug!("Using unaligned plate crop: {}", err);
                plate.clone()
            }
        };

        let enlarged = imaging::upscale(&aligned, self.settings.upscale);
        let characters = match self
            .characters
            .detect_characters(&enlarged, self.settings.character_thresholds)
        {
            Ok(characters) => characters,
            Err(err) => {
                warn!("Character detection failed: {}", err);
                Vec::new()
            }
        };

        self.assembler.assemble(&characters, vehicle_type)
    }
}
