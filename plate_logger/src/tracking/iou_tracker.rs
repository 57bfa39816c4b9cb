use image::RgbImage;

use crate::error::ModelError;
use crate::plate_detection::localizer::DetectionThresholds;
use crate::plate_detection::{BBox, TrackId, TrackedDetection, VehicleType};

/// Untracked box straight out of the vehicle detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub vehicle_type: VehicleType,
    pub bbox: BBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(vehicle_type: VehicleType, bbox: BBox, confidence: f32) -> Self {
        Self {
            vehicle_type,
            bbox,
            confidence,
        }
    }
}

/// External vehicle model run on whole frames.
pub trait VehicleDetector {
    fn detect_vehicles(
        &self,
        frame: &RgbImage,
        thresholds: DetectionThresholds,
    ) -> Result<Vec<Detection>, ModelError>;
}

/// Assigns persistent ids to per-frame detections.
pub trait Tracking {
    fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection>;
}

#[derive(Debug, Clone)]
struct LiveTrack {
    id: TrackId,
    bbox: BBox,
    missed: u32,
}

/// Greedy IoU association. Matching ignores class so a track keeps its id
/// when the detector flips its label.
#[derive(Debug)]
pub struct IouTracker {
    tracks: Vec<LiveTrack>,
    next_id: u32,
    match_iou: f32,
    max_age: u32,
}

impl IouTracker {
    pub fn new(match_iou: f32, max_age: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            match_iou,
            max_age,
        }
    }

    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Tracking for IouTracker {
    fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedDetection> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.match_iou {
                    pairs.push((iou, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut track_used = vec![false; self.tracks.len()];
        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        for (_, ti, di) in pairs {
            if track_used[ti] || assigned[di].is_some() {
                continue;
            }
            track_used[ti] = true;
            assigned[di] = Some(self.tracks[ti].id);
            self.tracks[ti].bbox = detections[di].bbox;
            self.tracks[ti].missed = 0;
        }

        for (used, track) in track_used.iter().zip(self.tracks.iter_mut()) {
            if !used {
                track.missed += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|t| t.missed <= max_age);

        let mut out = Vec::with_capacity(detections.len());
        for (det, id) in detections.into_iter().zip(assigned) {
            let id = match id {
                Some(id) => id,
                None => {
                    let id = self.next_track_id();
                    self.tracks.push(LiveTrack {
                        id,
                        bbox: det.bbox,
                        missed: 0,
                    });
                    id
                }
            };
            out.push(TrackedDetection::new(Some(id), det.vehicle_type, det.bbox, det.confidence));
        }
        out
    }
}
