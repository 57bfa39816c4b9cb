//! Background retry of plate reads that failed on the frame loop.
//!
//! A fixed set of worker threads pulls jobs from a bounded queue, re-reads
//! the vehicle crop at a higher scale, and posts the outcome on a result
//! channel. The frame loop polls that channel without blocking. Jobs carry no
//! ordering guarantee relative to each other.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::plate_detection::imaging;
use crate::plate_detection::localizer::PlateLocalizer;
use crate::plate_detection::{PlateResult, TrackId, VehicleType};

/// Anything able to turn a vehicle crop into a plate read.
pub trait PlateReader: Send + Sync {
    fn read_plate(&self, vehicle: &RgbImage, vehicle_type: VehicleType) -> PlateResult;
}

impl PlateReader for PlateLocalizer {
    fn read_plate(&self, vehicle: &RgbImage, vehicle_type: VehicleType) -> PlateResult {
        self.locate_and_read(vehicle, vehicle_type)
    }
}

/// What to do with a retry when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queued jobs, discard the new one.
    RejectNew,
    /// Discard the oldest queued job to make room.
    DropOldest,
}

#[derive(Debug, Clone)]
pub struct RetryJob {
    pub track_id: TrackId,
    /// Type at submission time; the track may be reclassified meanwhile.
    pub vehicle_type: VehicleType,
    pub vehicle_confidence: f32,
    pub vehicle_image: RgbImage,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub job: RetryJob,
    pub result: PlateResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Rejected,
    /// Queued after evicting the oldest waiting job of the given track.
    DisplacedOldest(TrackId),
}

pub struct RetryQueue {
    jobs: Option<Sender<RetryJob>>,
    // Second handle on the job queue, used to evict under DropOldest.
    backlog: Receiver<RetryJob>,
    results: Receiver<RetryOutcome>,
    workers: Vec<JoinHandle<()>>,
    policy: OverflowPolicy,
}

impl RetryQueue {
    pub fn new(
        reader: Arc<dyn PlateReader>,
        workers: usize,
        capacity: usize,
        upscale: u32,
        policy: OverflowPolicy,
    ) -> Self {
        let (job_tx, job_rx) = channel::bounded::<RetryJob>(capacity.max(1));
        let (result_tx, result_rx) = channel::unbounded::<RetryOutcome>();

        let handles = (0..workers.max(1))
            .map(|n| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let reader = reader.clone();
                thread::Builder::new()
                    .name(format!("plate-retry-{n}"))
                    .spawn(move || worker_loop(reader, jobs, results, upscale))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("Cannot spawn retry worker: {}", err);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!(
            "Retry pool ready: {} workers, queue capacity {}, overflow {:?}",
            handles.len(),
            capacity,
            policy
        );

        Self {
            jobs: Some(job_tx),
            backlog: job_rx,
            results: result_rx,
            workers: handles,
            policy,
        }
    }

    /// Never blocks. Overflow is resolved according to the queue's policy.
    pub fn submit(&self, job: RetryJob) -> SubmitOutcome {
        let Some(jobs) = self.jobs.as_ref() else {
            return SubmitOutcome::Rejected;
        };
        let track_id = job.track_id;

        let outcome = match jobs.try_send(job) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Rejected,
            Err(TrySendError::Full(job)) => match self.policy {
                OverflowPolicy::RejectNew => SubmitOutcome::Rejected,
                OverflowPolicy::DropOldest => match self.backlog.try_recv() {
                    Ok(evicted) => {
                        metrics::RETRIES_DROPPED.inc();
                        warn!(
                            "Retry queue full, evicted oldest job of track {}",
                            evicted.track_id
                        );
                        match jobs.try_send(job) {
                            Ok(()) => SubmitOutcome::DisplacedOldest(evicted.track_id),
                            Err(_) => SubmitOutcome::Rejected,
                        }
                    }
                    Err(TryRecvError::Empty) => match jobs.try_send(job) {
                        Ok(()) => SubmitOutcome::Queued,
                        Err(_) => SubmitOutcome::Rejected,
                    },
                    Err(TryRecvError::Disconnected) => SubmitOutcome::Rejected,
                },
            },
        };

        match outcome {
            SubmitOutcome::Rejected => {
                metrics::RETRIES_DROPPED.inc();
                warn!("Retry queue full, dropped job of track {}", track_id);
            }
            _ => {
                metrics::RETRIES_SUBMITTED.inc();
                debug!("Queued retry for track {}", track_id);
            }
        }
        outcome
    }

    /// Completed retries so far; returns immediately.
    pub fn drain(&self) -> Vec<RetryOutcome> {
        self.results.try_iter().collect()
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Closes the queue, waits for every queued job, and returns the
    /// outcomes not drained yet.
    pub fn shutdown(mut self) -> Vec<RetryOutcome> {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("A retry worker panicked");
            }
        }
        self.results.try_iter().collect()
    }
}

fn worker_loop(
    reader: Arc<dyn PlateReader>,
    jobs: Receiver<RetryJob>,
    results: Sender<RetryOutcome>,
    upscale: u32,
) {
    for job in jobs.iter() {
        let sharper = imaging::upscale(&job.vehicle_image, upscale);
        let result = reader.read_plate(&sharper, job.vehicle_type);
        if let Some(text) = result.text() {
            info!(
                "[Retry OCR] Track {}: {} (conf={:.2})",
                job.track_id,
                text,
                result.confidence()
            );
        }
        if results.send(RetryOutcome { job, result }).is_err() {
            break;
        }
    }
}
