pub mod config;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod plate_detection;
pub mod tracking;
#[cfg(feature = "video")]
pub mod video;
