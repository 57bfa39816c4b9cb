use plate_logger::config::Config;
use plate_logger::pipeline::OverflowPolicy;

#[test]
fn shipped_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../config.yaml");
    let config = Config::load(path).unwrap();
    assert_eq!(config.models.vehicle_classes.len(), 5);
    assert_eq!(config.models.character_classes.len(), 36);
    assert_eq!(config.retry.overflow, OverflowPolicy::RejectNew);
    assert_eq!(config.ocr.localizer_settings().upscale, 4);
    assert_eq!(config.logging.metrics_path.as_deref(), Some("output/metrics.prom"));
}
