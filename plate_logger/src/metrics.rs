//! Process-wide Prometheus counters.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FRAMES_PROCESSED: IntCounter =
        IntCounter::new("plate_frames_processed_total", "Frames run through the orchestrator")
            .expect("metric can be created");
    pub static ref DETECTIONS_SKIPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("plate_detections_skipped_total", "Boxes not admitted, by reason"),
        &["reason"]
    )
    .expect("metric can be created");
    pub static ref PLATES_ACCEPTED: IntCounterVec = IntCounterVec::new(
        Opts::new("plate_reads_accepted_total", "Accepted plate reads, by source"),
        &["source"]
    )
    .expect("metric can be created");
    pub static ref PLATES_REJECTED: IntCounter =
        IntCounter::new("plate_reads_rejected_total", "Plate reads with no usable text")
            .expect("metric can be created");
    pub static ref RETRIES_SUBMITTED: IntCounter =
        IntCounter::new("plate_retries_submitted_total", "Jobs handed to the retry pool")
            .expect("metric can be created");
    pub static ref RETRIES_DROPPED: IntCounter =
        IntCounter::new("plate_retries_dropped_total", "Retry jobs dropped on overflow")
            .expect("metric can be created");
    pub static ref RECORDS_WRITTEN: IntCounter =
        IntCounter::new("plate_records_written_total", "Successful store upserts")
            .expect("metric can be created");
    pub static ref PERSISTENCE_FAILURES: IntCounter =
        IntCounter::new("plate_persistence_failures_total", "Dropped store writes")
            .expect("metric can be created");
}

/// Registers every counter once. Safe to call repeatedly.
pub fn register() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(FRAMES_PROCESSED.clone()),
        Box::new(DETECTIONS_SKIPPED.clone()),
        Box::new(PLATES_ACCEPTED.clone()),
        Box::new(PLATES_REJECTED.clone()),
        Box::new(RETRIES_SUBMITTED.clone()),
        Box::new(RETRIES_DROPPED.clone()),
        Box::new(RECORDS_WRITTEN.clone()),
        Box::new(PERSISTENCE_FAILURES.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeated calls
        let _ = REGISTRY.register(collector);
    }
}

/// Text exposition of all registered counters.
pub fn render() -> String {
    register();
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Cannot encode metrics: {}", err);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
