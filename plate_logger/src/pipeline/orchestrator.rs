use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use image::RgbImage;
use tracing::{debug, error, info};

use super::retry_queue::{PlateReader, RetryJob, RetryOutcome, RetryQueue, SubmitOutcome};
use crate::config::FrameConfig;
use crate::metrics;
use crate::persistence::{DocumentStore, PersistenceRequest, UpsertOutcome};
use crate::plate_detection::{
    imaging, BBox, PlateResult, TrackId, TrackedDetection, VehicleLabel, VehicleType, UNRECOGNIZED,
};
use crate::tracking::{Sighting, TrackStateManager};

/// Indices of person boxes overlapping a motorcycle box by more than
/// `threshold` IoU. Those are riders already represented by the motorcycle.
pub fn rider_suppression(detections: &[TrackedDetection], threshold: f32) -> HashSet<usize> {
    let motorcycles: Vec<&BBox> = detections
        .iter()
        .filter(|d| d.vehicle_type == VehicleType::Motorcycle)
        .map(|d| &d.bbox)
        .collect();

    detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.vehicle_type == VehicleType::Person)
        .filter(|(_, d)| motorcycles.iter().any(|m| d.bbox.iou(m) > threshold))
        .map(|(i, _)| i)
        .collect()
}

/// True when the box keeps at least `margin` pixels from every frame edge.
pub fn is_admitted(bbox: &BBox, frame_width: u32, frame_height: u32, margin: f32) -> bool {
    bbox.x1 >= margin
        && bbox.y1 >= margin
        && bbox.x2 <= frame_width as f32 - margin
        && bbox.y2 <= frame_height as f32 - margin
}

#[derive(Debug, Default, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    /// One label per admitted box, in detector order.
    pub labels: Vec<VehicleLabel>,
    pub records_written: usize,
    pub retries_submitted: usize,
    pub retries_accepted: usize,
}

pub struct FrameOrchestrator {
    config: FrameConfig,
    tracks: TrackStateManager,
    reader: Arc<dyn PlateReader>,
    retries: Option<RetryQueue>,
    store: Arc<dyn DocumentStore>,
    in_flight: HashSet<TrackId>,
    frames: u64,
}

impl FrameOrchestrator {
    pub fn new(
        config: FrameConfig,
        reader: Arc<dyn PlateReader>,
        retries: Option<RetryQueue>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        metrics::register();
        Self {
            config,
            tracks: TrackStateManager::new(),
            reader,
            retries,
            store,
            in_flight: HashSet::new(),
            frames: 0,
        }
    }

    pub fn tracks(&self) -> &TrackStateManager {
        &self.tracks
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Runs every box of one frame through admission, disambiguation and the
    /// synchronous plate read, writes the frame's records, then folds in
    /// whatever background retries have finished.
    pub fn process_frame(&mut self, frame: &RgbImage, detections: Vec<TrackedDetection>) -> FrameReport {
        let mut report = FrameReport {
            frame_index: self.frames,
            ..Default::default()
        };
        let (width, height) = frame.dimensions();
        let riders = rider_suppression(&detections, self.config.rider_iou_threshold);
        let mut requests = Vec::new();

        for (index, detection) in detections.into_iter().enumerate() {
            if riders.contains(&index) {
                skip("rider");
                continue;
            }
            let Some(track_id) = detection.track_id else {
                skip("unassigned");
                continue;
            };
            if !is_admitted(&detection.bbox, width, height, self.config.edge_margin) {
                skip("edge");
                continue;
            }

            let detection = match self.tracks.observe(detection) {
                Sighting::Kept(detection) => detection,
                Sighting::Dropped => {
                    skip("reclassified");
                    continue;
                }
            };
            if detection.vehicle_type == VehicleType::Unknown {
                skip("class");
                continue;
            }

            let label = self.handle_detection(frame, track_id, &detection, &mut requests, &mut report);
            report.labels.push(label);
        }

        report.records_written += self.flush(requests);

        if let Some(retries) = self.retries.as_ref() {
            let outcomes = retries.drain();
            self.fold_retries(outcomes, &mut report);
        }

        self.frames += 1;
        metrics::FRAMES_PROCESSED.inc();
        report
    }

    fn handle_detection(
        &mut self,
        frame: &RgbImage,
        track_id: TrackId,
        detection: &TrackedDetection,
        requests: &mut Vec<PersistenceRequest>,
        report: &mut FrameReport,
    ) -> VehicleLabel {
        let vehicle_type = detection.vehicle_type;
        let mut plate = self.tracks.resolved_plate(track_id).map(str::to_string);

        if plate.is_none() {
            if let Some(crop) = imaging::crop(frame, &detection.bbox) {
                match self.reader.read_plate(&crop, vehicle_type) {
                    PlateResult::Recognized { text, confidence } => {
                        self.tracks.resolve_plate(track_id, &text, confidence);
                        metrics::PLATES_ACCEPTED.with_label_values(&["sync"]).inc();
                        info!("Track {} ({}): plate {} (conf={:.2})", track_id, vehicle_type, text, confidence);
                        requests.push(PersistenceRequest {
                            track_id,
                            vehicle_type,
                            plate_text: text.clone(),
                            vehicle_confidence: detection.confidence,
                            ocr_confidence: confidence,
                            vehicle_image: crop,
                        });
                        plate = Some(text);
                    }
                    PlateResult::Unrecognized(reason) => {
                        self.tracks.mark_pending(track_id);
                        metrics::PLATES_REJECTED.inc();
                        debug!("Track {} ({}): {}", track_id, vehicle_type, reason);
                        if self.config.persist_unrecognized {
                            requests.push(PersistenceRequest {
                                track_id,
                                vehicle_type,
                                plate_text: UNRECOGNIZED.to_string(),
                                vehicle_confidence: detection.confidence,
                                ocr_confidence: 0.0,
                                vehicle_image: crop.clone(),
                            });
                        }
                        if self.submit_retry(track_id, vehicle_type, detection.confidence, crop) {
                            report.retries_submitted += 1;
                        }
                    }
                }
            }
        }

        VehicleLabel::new(track_id, vehicle_type, detection.bbox, plate, detection.confidence)
    }

    // At most one retry per track is in flight at a time.
    fn submit_retry(
        &mut self,
        track_id: TrackId,
        vehicle_type: VehicleType,
        vehicle_confidence: f32,
        crop: RgbImage,
    ) -> bool {
        let Some(retries) = self.retries.as_ref() else {
            return false;
        };
        if self.in_flight.contains(&track_id) {
            return false;
        }

        let job = RetryJob {
            track_id,
            vehicle_type,
            vehicle_confidence,
            vehicle_image: crop,
        };
        match retries.submit(job) {
            SubmitOutcome::Queued => {
                self.in_flight.insert(track_id);
                true
            }
            SubmitOutcome::DisplacedOldest(evicted) => {
                self.in_flight.remove(&evicted);
                self.in_flight.insert(track_id);
                true
            }
            SubmitOutcome::Rejected => false,
        }
    }

    fn fold_retries(&mut self, outcomes: Vec<RetryOutcome>, report: &mut FrameReport) {
        let mut requests = Vec::new();
        for outcome in outcomes {
            let job = outcome.job;
            self.in_flight.remove(&job.track_id);

            let PlateResult::Recognized { text, confidence } = outcome.result else {
                debug!("Retry for track {} found nothing", job.track_id);
                continue;
            };
            if !self.tracks.resolve_plate(job.track_id, &text, confidence) {
                debug!(
                    "Track {} already resolved, ignoring retry result {}",
                    job.track_id, text
                );
                continue;
            }

            metrics::PLATES_ACCEPTED.with_label_values(&["retry"]).inc();
            report.retries_accepted += 1;
            requests.push(PersistenceRequest {
                track_id: job.track_id,
                vehicle_type: job.vehicle_type,
                plate_text: text,
                vehicle_confidence: job.vehicle_confidence,
                ocr_confidence: confidence,
                vehicle_image: job.vehicle_image,
            });
        }
        report.records_written += self.flush(requests);
    }

    /// Writes a batch in one store call; failures are logged and the
    /// requests dropped.
    fn flush(&self, requests: Vec<PersistenceRequest>) -> usize {
        let timestamp = Utc::now();
        let mut records = Vec::with_capacity(requests.len());
        for request in requests {
            let track_id = request.track_id;
            match request.into_record(timestamp) {
                Ok(record) => records.push(record),
                Err(err) => {
                    metrics::PERSISTENCE_FAILURES.inc();
                    error!("Cannot build record for track {}: {}", track_id, err);
                }
            }
        }
        if records.is_empty() {
            return 0;
        }

        let written: Vec<(TrackId, String)> = records.iter().map(|r| (r.track_id, r.plate_text.clone())).collect();
        let outcomes = match self.store.upsert_batch(records) {
            Ok(outcomes) => outcomes,
            Err(err) => {
                metrics::PERSISTENCE_FAILURES.inc_by(written.len() as u64);
                error!("Dropping {} record(s): {}", written.len(), err);
                return 0;
            }
        };
        for ((track_id, plate), outcome) in written.iter().zip(&outcomes) {
            match outcome {
                UpsertOutcome::Inserted(id) => {
                    info!("Inserted record {} for track {} with plate {}", id, track_id, plate)
                }
                UpsertOutcome::Updated(id) => {
                    info!("Updated record {} for track {} with plate {}", id, track_id, plate)
                }
            }
        }
        metrics::RECORDS_WRITTEN.inc_by(outcomes.len() as u64);
        outcomes.len()
    }

    /// End of stream: waits for outstanding retries and persists their
    /// accepted results.
    pub fn finish(&mut self) -> FrameReport {
        let mut report = FrameReport {
            frame_index: self.frames,
            ..Default::default()
        };
        if let Some(retries) = self.retries.take() {
            let outcomes = retries.shutdown();
            self.fold_retries(outcomes, &mut report);
        }
        report
    }
}

fn skip(reason: &str) {
    metrics::DETECTIONS_SKIPPED.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(id: u32, vehicle_type: VehicleType, bbox: BBox) -> TrackedDetection {
        TrackedDetection::new(Some(TrackId(id)), vehicle_type, bbox, 0.9)
    }

    // Person box shifted horizontally against a 100x100 motorcycle box.
    fn person_with_iou(target: f32) -> BBox {
        // iou = (100 - s) * 100 / (100 * 100 + s * 100) => s = 100 (1 - t) / (1 + t)
        let shift = 100.0 * (1.0 - target) / (1.0 + target);
        BBox::new(shift, 0.0, 100.0 + shift, 100.0)
    }

    #[test]
    fn rider_above_threshold_is_suppressed() {
        let moto = BBox::new(0.0, 0.0, 100.0, 100.0);
        let person = person_with_iou(0.6);
        assert!((person.iou(&moto) - 0.6).abs() < 1e-3);
        let detections = vec![det(1, VehicleType::Motorcycle, moto), det(2, VehicleType::Person, person)];
        assert_eq!(rider_suppression(&detections, 0.5), HashSet::from([1]));
    }

    #[test]
    fn pedestrian_below_threshold_is_kept() {
        let moto = BBox::new(0.0, 0.0, 100.0, 100.0);
        let person = person_with_iou(0.4);
        let detections = vec![det(1, VehicleType::Motorcycle, moto), det(2, VehicleType::Person, person)];
        assert!(rider_suppression(&detections, 0.5).is_empty());
    }

    #[test]
    fn only_persons_are_suppressed() {
        let b = BBox::new(0.0, 0.0, 100.0, 100.0);
        let detections = vec![det(1, VehicleType::Motorcycle, b), det(2, VehicleType::Car, b)];
        assert!(rider_suppression(&detections, 0.5).is_empty());
    }

    #[test]
    fn admission_requires_margin_on_every_edge() {
        assert!(is_admitted(&BBox::new(10.0, 10.0, 90.0, 90.0), 100, 100, 10.0));
        assert!(!is_admitted(&BBox::new(9.0, 10.0, 90.0, 90.0), 100, 100, 10.0));
        assert!(!is_admitted(&BBox::new(10.0, 9.0, 90.0, 90.0), 100, 100, 10.0));
        assert!(!is_admitted(&BBox::new(10.0, 10.0, 91.0, 90.0), 100, 100, 10.0));
        assert!(!is_admitted(&BBox::new(10.0, 10.0, 90.0, 91.0), 100, 100, 10.0));
    }
}
