pub mod iou_tracker;
pub mod state;

pub use iou_tracker::{Detection, IouTracker, Tracking, VehicleDetector};
pub use state::{Sighting, TrackPhase, TrackState, TrackStateManager};
