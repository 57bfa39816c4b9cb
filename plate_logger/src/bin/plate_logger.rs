use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plate_logger::config::Config;
use plate_logger::metrics;
use plate_logger::persistence::{DocumentStore, JsonFileStore, MemoryStore, RecordQuery};
use plate_logger::pipeline::{FrameOrchestrator, RetryQueue};
use plate_logger::plate_detection::assembler::CharacterAssembler;
use plate_logger::plate_detection::localizer::PlateLocalizer;
use plate_logger::tracking::{IouTracker, Tracking, VehicleDetector};
use plate_logger::video::bounding_box_render::BoundingBoxRender;
use plate_logger::video::object_detector::ObjectDetector;
use plate_logger::video::quad_detector::ContourQuadDetector;
use plate_logger::video::video_reader::VideoReader;

fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    Ok(match config.store.path.as_deref() {
        Some(path) => Arc::new(JsonFileStore::open(path).with_context(|| format!("opening store {path}"))?),
        None => {
            warn!("No store path configured, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    })
}

fn main() -> Result<()> {
    let config_path = env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path).with_context(|| format!("loading {config_path}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    metrics::register();

    info!("Starting plate logger with {}", config_path);

    let models = &config.models;
    let vehicles = ObjectDetector::from_onnx(
        &models.vehicle_path,
        models.input_size,
        models.vehicle_classes.clone(),
        models.use_gpu,
    )?;
    let plates = Arc::new(ObjectDetector::from_onnx(
        &models.plate_path,
        models.input_size,
        vec!["plate".to_string()],
        models.use_gpu,
    )?);
    let characters = Arc::new(ObjectDetector::from_onnx(
        &models.character_path,
        models.input_size,
        models.character_classes.clone(),
        models.use_gpu,
    )?);

    let assembler = CharacterAssembler::new(config.ocr.char_confidence_floor, config.ocr.line_height_ratio);
    let localizer = Arc::new(PlateLocalizer::new(
        plates,
        characters,
        Arc::new(ContourQuadDetector::default()),
        assembler,
        config.ocr.localizer_settings(),
    ));
    let retries = RetryQueue::new(
        localizer.clone(),
        config.retry.workers,
        config.retry.queue_capacity,
        config.retry.upscale,
        config.retry.overflow,
    );
    let store = open_store(&config)?;
    let mut orchestrator = FrameOrchestrator::new(config.frame.clone(), localizer, Some(retries), store.clone());

    let mut tracker = IouTracker::new(config.tracking.match_iou, config.tracking.max_age);
    let mut reader = VideoReader::open(&config.video.input, config.video.max_fps)?;
    let mut render: Option<BoundingBoxRender> = None;

    let started = Instant::now();
    let mut records = 0;
    while let Some(frame) = reader.next_frame()? {
        let detections = match vehicles.detect_vehicles(&frame, config.tracking.detector) {
            Ok(detections) => detections,
            Err(err) => {
                warn!("Vehicle detection failed on frame {}: {}", reader.frames_read(), err);
                Vec::new()
            }
        };
        let tracked = tracker.update(detections);
        let report = orchestrator.process_frame(&frame, tracked);
        records += report.records_written;

        if render.is_none() {
            render = Some(BoundingBoxRender::with_save_to_file(
                &config.video.output,
                &config.video.fourcc,
                reader.fps_or(config.video.max_fps),
                frame.width(),
                frame.height(),
            )?);
        }
        if let Some(render) = render.as_mut() {
            render.render(&frame, &report.labels)?;
        }
    }

    info!("End of stream, waiting for outstanding retries");
    let last = orchestrator.finish();
    records += last.records_written;
    drop(render);

    let stored = store
        .list(&RecordQuery {
            limit: config.store.list_limit,
            ..Default::default()
        })
        .map(|r| r.len())
        .unwrap_or(0);
    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Processed {} frames in {:.1}s ({:.1} fps), {} tracks, {} writes, {} stored records",
        orchestrator.frames_processed(),
        elapsed,
        orchestrator.frames_processed() as f64 / elapsed.max(f64::EPSILON),
        orchestrator.tracks().len(),
        records,
        stored
    );

    if let Some(path) = config.logging.metrics_path.as_deref() {
        fs::write(path, metrics::render()).with_context(|| format!("writing metrics to {path}"))?;
        info!("Metrics written to {}", path);
    }
    Ok(())
}
