//! Per-track memory of vehicle class and resolved plate.
//!
//! # Lifecycle
//! - **New**: the id has never been seen (no entry exists).
//! - **VehicleOnly**: the first sighting recorded a vehicle type.
//! - **PlatePending**: at least one read failed and a retry may be in flight.
//! - **PlateResolved**: a validated plate was accepted. The text is frozen
//!   for the rest of the session.
//!
//! Entries are never removed; ids may disappear and come back within the
//! tracker's re-identification window.

use std::collections::HashMap;

use tracing::debug;

use crate::plate_detection::{TrackId, TrackedDetection, VehicleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    VehicleOnly,
    PlatePending,
    PlateResolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub track_id: TrackId,
    pub vehicle_type: VehicleType,
    pub plate_text: Option<String>,
    pub plate_confidence: f32,
    pub phase: TrackPhase,
}

impl TrackState {
    fn new(track_id: TrackId, vehicle_type: VehicleType) -> Self {
        Self {
            track_id,
            vehicle_type,
            plate_text: None,
            plate_confidence: 0.0,
            phase: TrackPhase::VehicleOnly,
        }
    }
}

/// Result of feeding one sighting through the class disambiguation rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Sighting {
    /// The sighting continues through the pipeline, possibly with its type
    /// rewritten.
    Kept(TrackedDetection),
    /// A motorcycle rider momentarily classified as a person.
    Dropped,
}

#[derive(Debug, Default)]
pub struct TrackStateManager {
    tracks: HashMap<TrackId, TrackState>,
}

impl TrackStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the person/motorcycle rules and records the sighting's type.
    ///
    /// A track last seen as a motorcycle that now reports person is dropped
    /// without touching the stored type. A track last seen as a person that
    /// now reports motorcycle stays a person. Every other transition replaces
    /// the stored type.
    pub fn observe(&mut self, mut detection: TrackedDetection) -> Sighting {
        let Some(track_id) = detection.track_id else {
            return Sighting::Kept(detection);
        };

        match self.tracks.get_mut(&track_id) {
            None => {
                self.tracks
                    .insert(track_id, TrackState::new(track_id, detection.vehicle_type));
            }
            Some(state) => match (state.vehicle_type, detection.vehicle_type) {
                (VehicleType::Motorcycle, VehicleType::Person) => {
                    debug!("Track {} rider reclassified as person, dropping", track_id);
                    return Sighting::Dropped;
                }
                (VehicleType::Person, VehicleType::Motorcycle) => {
                    detection.vehicle_type = VehicleType::Person;
                }
                (_, current) => state.vehicle_type = current,
            },
        }

        Sighting::Kept(detection)
    }

    /// Stores an accepted plate. Returns `false` when the track already has
    /// one; the stored text never changes once set.
    pub fn resolve_plate(&mut self, track_id: TrackId, text: &str, confidence: f32) -> bool {
        let state = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackState::new(track_id, VehicleType::Unknown));

        if state.phase == TrackPhase::PlateResolved {
            return false;
        }

        state.plate_text = Some(text.to_string());
        state.plate_confidence = confidence;
        state.phase = TrackPhase::PlateResolved;
        true
    }

    /// Marks an unsuccessful read. Resolved tracks are left untouched.
    pub fn mark_pending(&mut self, track_id: TrackId) {
        if let Some(state) = self.tracks.get_mut(&track_id) {
            if state.phase == TrackPhase::VehicleOnly {
                state.phase = TrackPhase::PlatePending;
            }
        }
    }

    pub fn state(&self, track_id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn resolved_plate(&self, track_id: TrackId) -> Option<&str> {
        self.tracks
            .get(&track_id)
            .and_then(|state| state.plate_text.as_deref())
    }

    pub fn vehicle_type(&self, track_id: TrackId) -> Option<VehicleType> {
        self.tracks.get(&track_id).map(|state| state.vehicle_type)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
