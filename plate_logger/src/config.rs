use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::retry_queue::OverflowPolicy;
use crate::plate_detection::alignment::{ALIGNED_HEIGHT, ALIGNED_WIDTH};
use crate::plate_detection::imaging::MAX_UPSCALE;
use crate::plate_detection::localizer::{DetectionThresholds, LocalizerSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelConfig,
    pub video: VideoConfig,
    pub tracking: TrackingConfig,
    pub frame: FrameConfig,
    pub ocr: OcrConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub vehicle_path: String,
    pub plate_path: String,
    pub character_path: String,
    /// Class names in model output order.
    pub vehicle_classes: Vec<String>,
    pub character_classes: Vec<String>,
    pub input_size: i32,
    pub use_gpu: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vehicle_path: "models/vehicle.onnx".to_string(),
            plate_path: "models/plate.onnx".to_string(),
            character_path: "models/ocr.onnx".to_string(),
            vehicle_classes: ["bus", "car", "motorcycle", "person", "truck"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            character_classes: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ"
                .chars()
                .map(|c| c.to_string())
                .collect(),
            input_size: 640,
            use_gpu: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub input: String,
    pub output: String,
    pub max_fps: f64,
    pub fourcc: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input: "data/input.mp4".to_string(),
            output: "output/annotated.avi".to_string(),
            max_fps: 25.0,
            fourcc: "XVID".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub detector: DetectionThresholds,
    pub match_iou: f32,
    pub max_age: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            detector: DetectionThresholds::new(0.6, 0.6),
            match_iou: 0.3,
            max_age: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Boxes closer than this to any frame edge are ignored.
    pub edge_margin: f32,
    pub rider_iou_threshold: f32,
    /// Also write records for reads that produced no plate.
    pub persist_unrecognized: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            edge_margin: 10.0,
            rider_iou_threshold: 0.5,
            persist_unrecognized: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub char_confidence_floor: f32,
    pub line_height_ratio: f32,
    pub plate_region: DetectionThresholds,
    pub characters: DetectionThresholds,
    pub pad_width: f32,
    pub pad_height: f32,
    pub upscale: u32,
    pub aligned_width: u32,
    pub aligned_height: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            char_confidence_floor: 0.5,
            line_height_ratio: 0.7,
            plate_region: DetectionThresholds::new(0.6, 0.7),
            characters: DetectionThresholds::new(0.5, 0.7),
            pad_width: 0.10,
            pad_height: 0.15,
            upscale: 4,
            aligned_width: ALIGNED_WIDTH,
            aligned_height: ALIGNED_HEIGHT,
        }
    }
}

impl OcrConfig {
    pub fn localizer_settings(&self) -> LocalizerSettings {
        LocalizerSettings {
            region_thresholds: self.plate_region,
            character_thresholds: self.characters,
            pad_width: self.pad_width,
            pad_height: self.pad_height,
            upscale: self.upscale,
            aligned_width: self.aligned_width,
            aligned_height: self.aligned_height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub upscale: u32,
    pub overflow: OverflowPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 64,
            upscale: 2,
            overflow: OverflowPolicy::RejectNew,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document path. Records stay in memory when unset.
    pub path: Option<String>,
    pub list_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some("output/plates.json".to_string()),
            list_limit: crate::persistence::store::DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub metrics_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_path: None,
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")));
    }
    Ok(())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.workers == 0 {
            return Err(ConfigError::Invalid("retry.workers must be at least 1".into()));
        }
        if self.retry.queue_capacity == 0 {
            return Err(ConfigError::Invalid("retry.queue_capacity must be at least 1".into()));
        }
        if self.ocr.upscale == 0 || self.retry.upscale == 0 {
            return Err(ConfigError::Invalid("upscale factors must be positive".into()));
        }
        if self.ocr.upscale > MAX_UPSCALE || self.retry.upscale > MAX_UPSCALE {
            return Err(ConfigError::Invalid(format!(
                "upscale factors must be at most {MAX_UPSCALE}"
            )));
        }
        if !(self.ocr.line_height_ratio > 0.0 && self.ocr.line_height_ratio.is_finite()) {
            return Err(ConfigError::Invalid("ocr.line_height_ratio must be positive".into()));
        }
        if self.frame.edge_margin < 0.0 {
            return Err(ConfigError::Invalid("frame.edge_margin must not be negative".into()));
        }
        check_unit("frame.rider_iou_threshold", self.frame.rider_iou_threshold)?;
        check_unit("ocr.char_confidence_floor", self.ocr.char_confidence_floor)?;
        check_unit("ocr.plate_region.confidence", self.ocr.plate_region.confidence)?;
        check_unit("ocr.plate_region.iou", self.ocr.plate_region.iou)?;
        check_unit("ocr.characters.confidence", self.ocr.characters.confidence)?;
        check_unit("ocr.characters.iou", self.ocr.characters.iou)?;
        check_unit("tracking.detector.confidence", self.tracking.detector.confidence)?;
        check_unit("tracking.detector.iou", self.tracking.detector.iou)?;
        check_unit("tracking.match_iou", self.tracking.match_iou)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.retry.workers, 8);
        assert_eq!(config.frame.edge_margin, 10.0);
        assert_eq!(config.ocr.upscale, 4);
        assert_eq!(config.retry.overflow, OverflowPolicy::RejectNew);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = Config::from_yaml(
            "retry:\n  workers: 2\n  overflow: drop_oldest\nframe:\n  persist_unrecognized: true\n",
        )
        .unwrap();
        assert_eq!(config.retry.workers, 2);
        assert_eq!(config.retry.queue_capacity, 64);
        assert_eq!(config.retry.overflow, OverflowPolicy::DropOldest);
        assert!(config.frame.persist_unrecognized);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Config::from_yaml("retry:\n  workers: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("ocr:\n  char_confidence_floor: 1.5\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_degenerate_ocr_geometry() {
        for yaml in [
            "ocr:\n  line_height_ratio: 0.0\n",
            "ocr:\n  line_height_ratio: -0.5\n",
            "ocr:\n  upscale: 17\n",
            "retry:\n  upscale: 4096\n",
        ] {
            assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Invalid(_))), "{yaml}");
        }
        assert_eq!(Config::from_yaml("ocr:\n  upscale: 16\n").unwrap().ocr.upscale, MAX_UPSCALE);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Config::load("/nonexistent/config.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
