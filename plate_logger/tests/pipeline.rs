use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender};
use image::{Rgb, RgbImage};

use plate_logger::config::FrameConfig;
use plate_logger::error::{ModelError, PersistenceError};
use plate_logger::persistence::{
    DocumentStore, JsonFileStore, MemoryStore, PersistenceRecord, RecordQuery, StoredRecord, UpsertOutcome,
};
use plate_logger::pipeline::{FrameOrchestrator, OverflowPolicy, PlateReader, RetryQueue};
use plate_logger::plate_detection::alignment::NoQuadDetector;
use plate_logger::plate_detection::assembler::CharacterAssembler;
use plate_logger::plate_detection::localizer::{
    CharacterDetector, DetectionThresholds, LocalizerSettings, PlateLocalizer, PlateRegion, PlateRegionDetector,
};
use plate_logger::plate_detection::{
    BBox, CharacterDetection, PlateResult, TrackId, TrackedDetection, UnreadableReason, VehicleType,
};
use plate_logger::tracking::TrackPhase;

/// Plays back scripted results; the last one repeats.
struct ScriptedReader {
    results: Mutex<VecDeque<PlateResult>>,
    calls: AtomicUsize,
}

impl ScriptedReader {
    fn new(results: Vec<PlateResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PlateReader for ScriptedReader {
    fn read_plate(&self, _: &RgbImage, _: VehicleType) -> PlateResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results.front().cloned().unwrap()
        }
    }
}

/// Blocks each read until the gate is closed, then reports the plate.
struct GatedReader {
    plate: &'static str,
    gate: Receiver<()>,
    started: (Sender<()>, Receiver<()>),
    widths: Mutex<Vec<u32>>,
}

impl GatedReader {
    /// Waits until a worker has taken a job off the queue.
    fn wait_started(&self) {
        self.started.1.recv().unwrap();
    }
}

impl PlateReader for GatedReader {
    fn read_plate(&self, vehicle: &RgbImage, _: VehicleType) -> PlateResult {
        self.widths.lock().unwrap().push(vehicle.width());
        let _ = self.started.0.send(());
        let _ = self.gate.recv();
        recognized(self.plate)
    }
}

fn gated(plate: &'static str) -> (Arc<GatedReader>, Sender<()>) {
    let (gate_tx, gate_rx) = channel::unbounded();
    let reader = Arc::new(GatedReader {
        plate,
        gate: gate_rx,
        started: channel::unbounded(),
        widths: Mutex::new(Vec::new()),
    });
    (reader, gate_tx)
}

/// Every write fails as if the backing service were down.
struct UnavailableStore;

impl DocumentStore for UnavailableStore {
    fn upsert(&self, _: PersistenceRecord) -> Result<UpsertOutcome, PersistenceError> {
        Err(PersistenceError::Unavailable("store down".into()))
    }

    fn list(&self, _: &RecordQuery) -> Result<Vec<StoredRecord>, PersistenceError> {
        Ok(Vec::new())
    }

    fn get(&self, _: u64) -> Result<Option<StoredRecord>, PersistenceError> {
        Ok(None)
    }

    fn delete_all(&self) -> Result<usize, PersistenceError> {
        Ok(0)
    }
}

fn recognized(text: &str) -> PlateResult {
    PlateResult::Recognized {
        text: text.to_string(),
        confidence: 0.9,
    }
}

fn unreadable() -> PlateResult {
    PlateResult::Unrecognized(UnreadableReason::AssemblyRejected)
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]))
}

fn det(id: u32, vehicle_type: VehicleType, bbox: BBox) -> TrackedDetection {
    TrackedDetection::new(Some(TrackId(id)), vehicle_type, bbox, 0.88)
}

fn car_box() -> BBox {
    BBox::new(20.0, 20.0, 120.0, 100.0)
}

fn orchestrator(
    reader: Arc<dyn PlateReader>,
    retries: Option<RetryQueue>,
    store: Arc<dyn DocumentStore>,
) -> FrameOrchestrator {
    FrameOrchestrator::new(FrameConfig::default(), reader, retries, store)
}

fn all_records(store: &dyn DocumentStore) -> Vec<StoredRecord> {
    store.list(&RecordQuery::default()).unwrap()
}

#[test]
fn accepted_plate_is_persisted_once() {
    let reader = ScriptedReader::new(vec![recognized("30A12345")]);
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(reader.clone(), None, store.clone());

    let first = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(first.records_written, 1);
    assert_eq!(first.labels[0].plate.as_deref(), Some("30A12345"));
    assert_eq!(first.labels[0].caption(), "#5 car | 30A12345 | conf: 0.88");

    for _ in 0..3 {
        let report = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
        assert_eq!(report.records_written, 0);
        assert_eq!(report.labels[0].plate.as_deref(), Some("30A12345"));
    }
    assert_eq!(reader.calls(), 1);

    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    let record = &records[0].record;
    assert_eq!(record.track_id, TrackId(5));
    assert_eq!(record.vehicle_type, VehicleType::Car);
    assert_eq!(record.plate_text, "30A12345");
    assert!((record.ocr_confidence - 0.9).abs() < 1e-6);
    assert!(!record.vehicle_image.is_empty());
}

#[test]
fn unreadable_plate_renders_placeholder_without_writing() {
    let reader = ScriptedReader::new(vec![unreadable()]);
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(reader, None, store.clone());

    let report = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(report.records_written, 0);
    assert_eq!(report.labels.len(), 1);
    assert_eq!(report.labels[0].plate, None);
    assert!(report.labels[0].caption().contains("unrecognized"));
    assert_eq!(pipeline.tracks().state(TrackId(5)).unwrap().phase, TrackPhase::PlatePending);
    assert!(all_records(store.as_ref()).is_empty());
}

#[test]
fn unreadable_plate_can_be_persisted_as_placeholder() {
    let reader = ScriptedReader::new(vec![unreadable(), recognized("30A12345")]);
    let store = Arc::new(MemoryStore::new());
    let config = FrameConfig {
        persist_unrecognized: true,
        ..FrameConfig::default()
    };
    let mut pipeline = FrameOrchestrator::new(config, reader, None, store.clone());

    pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.plate_text, "unrecognized");
    assert_eq!(records[0].record.ocr_confidence, 0.0);

    // A later accepted read replaces the placeholder under the same key.
    pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.plate_text, "30A12345");
}

#[test]
fn rider_overlapping_motorcycle_is_suppressed() {
    let reader = ScriptedReader::new(vec![unreadable()]);
    let mut pipeline = orchestrator(reader, None, Arc::new(MemoryStore::new()));

    // IoU 7500 / 12500 = 0.6
    let detections = vec![
        det(1, VehicleType::Motorcycle, BBox::new(20.0, 20.0, 120.0, 120.0)),
        det(2, VehicleType::Person, BBox::new(45.0, 20.0, 145.0, 120.0)),
    ];
    let report = pipeline.process_frame(&frame(), detections);
    assert_eq!(report.labels.len(), 1);
    assert_eq!(report.labels[0].vehicle_type, VehicleType::Motorcycle);
    assert!(pipeline.tracks().state(TrackId(2)).is_none());
}

#[test]
fn pedestrian_near_motorcycle_is_kept() {
    let reader = ScriptedReader::new(vec![unreadable()]);
    let mut pipeline = orchestrator(reader, None, Arc::new(MemoryStore::new()));

    // IoU 5700 / 14300 is about 0.4
    let detections = vec![
        det(1, VehicleType::Motorcycle, BBox::new(20.0, 20.0, 120.0, 120.0)),
        det(2, VehicleType::Person, BBox::new(63.0, 20.0, 163.0, 120.0)),
    ];
    let report = pipeline.process_frame(&frame(), detections);
    assert_eq!(report.labels.len(), 2);
    assert_eq!(report.labels[1].vehicle_type, VehicleType::Person);
}

#[test]
fn motorcycle_seen_as_person_is_dropped() {
    let reader = ScriptedReader::new(vec![unreadable()]);
    let mut pipeline = orchestrator(reader, None, Arc::new(MemoryStore::new()));

    pipeline.process_frame(&frame(), vec![det(7, VehicleType::Motorcycle, car_box())]);
    let report = pipeline.process_frame(&frame(), vec![det(7, VehicleType::Person, car_box())]);
    assert!(report.labels.is_empty());
    assert_eq!(pipeline.tracks().vehicle_type(TrackId(7)), Some(VehicleType::Motorcycle));
}

#[test]
fn person_seen_as_motorcycle_stays_person() {
    let reader = ScriptedReader::new(vec![unreadable()]);
    let mut pipeline = orchestrator(reader, None, Arc::new(MemoryStore::new()));

    pipeline.process_frame(&frame(), vec![det(8, VehicleType::Person, car_box())]);
    let report = pipeline.process_frame(&frame(), vec![det(8, VehicleType::Motorcycle, car_box())]);
    assert_eq!(report.labels.len(), 1);
    assert_eq!(report.labels[0].vehicle_type, VehicleType::Person);
    assert_eq!(pipeline.tracks().vehicle_type(TrackId(8)), Some(VehicleType::Person));
}

#[test]
fn boxes_touching_the_edge_margin_are_ignored() {
    let reader = ScriptedReader::new(vec![recognized("30A12345")]);
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(reader.clone(), None, store.clone());

    let detections = vec![
        det(1, VehicleType::Car, BBox::new(5.0, 20.0, 100.0, 100.0)),
        det(2, VehicleType::Car, BBox::new(20.0, 20.0, 195.0, 100.0)),
    ];
    let report = pipeline.process_frame(&frame(), detections);
    assert!(report.labels.is_empty());
    assert_eq!(reader.calls(), 0);
    assert!(all_records(store.as_ref()).is_empty());
}

#[test]
fn unassigned_boxes_are_ignored() {
    let reader = ScriptedReader::new(vec![recognized("30A12345")]);
    let mut pipeline = orchestrator(reader.clone(), None, Arc::new(MemoryStore::new()));

    let detection = TrackedDetection::new(None, VehicleType::Car, car_box(), 0.9);
    let report = pipeline.process_frame(&frame(), vec![detection]);
    assert!(report.labels.is_empty());
    assert_eq!(reader.calls(), 0);
    assert!(pipeline.tracks().is_empty());
}

#[test]
fn retry_result_is_persisted_at_end_of_stream() {
    let sync = ScriptedReader::new(vec![unreadable()]);
    let (retry_reader, gate) = gated("30A12345");
    drop(gate);
    let retries = RetryQueue::new(retry_reader.clone(), 2, 8, 2, OverflowPolicy::RejectNew);
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(sync, Some(retries), store.clone());

    let report = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(report.retries_submitted, 1);

    // The worker may finish before the first frame drains its results.
    let last = pipeline.finish();
    assert_eq!(report.retries_accepted + last.retries_accepted, 1);
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(5)), Some("30A12345"));

    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.plate_text, "30A12345");
    assert_eq!(records[0].record.vehicle_type, VehicleType::Car);
    // Car crop is 100 px wide, retried at twice the size.
    assert_eq!(retry_reader.widths.lock().unwrap().as_slice(), &[200]);
}

#[test]
fn one_retry_in_flight_per_track() {
    let sync = ScriptedReader::new(vec![unreadable()]);
    let (retry_reader, gate) = gated("30A12345");
    let retries = RetryQueue::new(retry_reader, 1, 8, 2, OverflowPolicy::RejectNew);
    let mut pipeline = orchestrator(sync, Some(retries), Arc::new(MemoryStore::new()));

    let submitted: usize = (0..4)
        .map(|_| {
            pipeline
                .process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())])
                .retries_submitted
        })
        .sum();
    assert_eq!(submitted, 1);

    drop(gate);
    assert_eq!(pipeline.finish().retries_accepted, 1);
}

#[test]
fn late_retry_never_replaces_resolved_plate() {
    let sync = ScriptedReader::new(vec![unreadable(), recognized("30A12345")]);
    let (retry_reader, gate) = gated("51G12345");
    let retries = RetryQueue::new(retry_reader, 1, 8, 2, OverflowPolicy::RejectNew);
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(sync, Some(retries), store.clone());

    pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    let second = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(second.labels[0].plate.as_deref(), Some("30A12345"));

    drop(gate);
    let last = pipeline.finish();
    assert_eq!(last.retries_accepted, 0);
    assert_eq!(last.records_written, 0);
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(5)), Some("30A12345"));

    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.plate_text, "30A12345");
}

#[test]
fn evicted_retry_is_resubmitted_on_next_sighting() {
    let sync = ScriptedReader::new(vec![unreadable()]);
    let (retry_reader, gate) = gated("30A12345");
    let retries = RetryQueue::new(retry_reader.clone(), 1, 1, 2, OverflowPolicy::DropOldest);
    let mut pipeline = orchestrator(sync, Some(retries), Arc::new(MemoryStore::new()));

    let first = pipeline.process_frame(&frame(), vec![det(1, VehicleType::Car, car_box())]);
    assert_eq!(first.retries_submitted, 1);
    retry_reader.wait_started();

    // Worker busy on track 1: track 2 fills the queue, track 3 evicts it.
    let lower_left = BBox::new(20.0, 110.0, 100.0, 180.0);
    let second = pipeline.process_frame(
        &frame(),
        vec![
            det(2, VehicleType::Car, lower_left),
            det(3, VehicleType::Car, BBox::new(110.0, 110.0, 180.0, 180.0)),
        ],
    );
    assert_eq!(second.retries_submitted, 2);

    let third = pipeline.process_frame(&frame(), vec![det(2, VehicleType::Car, lower_left)]);
    assert_eq!(third.retries_submitted, 1);

    drop(gate);
    pipeline.finish();
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(1)), Some("30A12345"));
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(2)), Some("30A12345"));
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(3)), None);
}

#[test]
fn store_outage_does_not_stop_the_pipeline() {
    let reader = ScriptedReader::new(vec![recognized("30A12345")]);
    let mut pipeline = orchestrator(reader.clone(), None, Arc::new(UnavailableStore));

    let first = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    let second = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(first.records_written, 0);
    assert_eq!(second.records_written, 0);
    assert_eq!(second.labels.len(), 1);
    assert_eq!(second.labels[0].plate.as_deref(), Some("30A12345"));
    assert_eq!(pipeline.tracks().resolved_plate(TrackId(5)), Some("30A12345"));
    assert_eq!(pipeline.frames_processed(), 2);
    assert_eq!(reader.calls(), 1);
}

#[test]
fn records_survive_in_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plates.json");
    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let reader = ScriptedReader::new(vec![recognized("51G12345")]);
        let mut pipeline = orchestrator(reader, None, store);
        pipeline.process_frame(&frame(), vec![det(3, VehicleType::Truck, car_box())]);
    }

    let reopened = JsonFileStore::open(&path).unwrap();
    let found = reopened
        .list(&RecordQuery {
            search: Some("51g".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].record.vehicle_type, VehicleType::Truck);
}

struct WholeCropRegion;

impl PlateRegionDetector for WholeCropRegion {
    fn detect_regions(&self, vehicle: &RgbImage, _: DetectionThresholds) -> Result<Vec<PlateRegion>, ModelError> {
        Ok(vec![PlateRegion {
            bbox: BBox::new(10.0, 40.0, vehicle.width() as f32 - 10.0, vehicle.height() as f32 - 10.0),
            confidence: 0.9,
        }])
    }
}

struct FixedGlyphs(&'static str);

impl CharacterDetector for FixedGlyphs {
    fn detect_characters(&self, _: &RgbImage, _: DetectionThresholds) -> Result<Vec<CharacterDetection>, ModelError> {
        Ok(self
            .0
            .chars()
            .enumerate()
            .map(|(i, c)| CharacterDetection::new(20.0 + 30.0 * i as f32, 50.0, 40.0, c, 0.95))
            .collect())
    }
}

fn localizer(glyphs: &'static str) -> Arc<PlateLocalizer> {
    Arc::new(PlateLocalizer::new(
        Arc::new(WholeCropRegion),
        Arc::new(FixedGlyphs(glyphs)),
        Arc::new(NoQuadDetector),
        CharacterAssembler::default(),
        LocalizerSettings::default(),
    ))
}

#[test]
fn localizer_reads_car_plate_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(localizer("30A12345"), None, store.clone());

    let report = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(report.labels[0].plate.as_deref(), Some("30A12345"));

    let records = all_records(store.as_ref());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.track_id, TrackId(5));
    assert!((records[0].record.ocr_confidence - 0.95).abs() < 1e-6);
}

#[test]
fn localizer_rejects_short_reads() {
    let store = Arc::new(MemoryStore::new());
    let mut pipeline = orchestrator(localizer("30A"), None, store.clone());

    let report = pipeline.process_frame(&frame(), vec![det(5, VehicleType::Car, car_box())]);
    assert_eq!(report.labels[0].plate, None);
    assert_eq!(report.records_written, 0);
    assert!(all_records(store.as_ref()).is_empty());
}
