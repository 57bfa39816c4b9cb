use thiserror::Error;

/// Stream-level failures. These end the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input unavailable: {0}")]
    InputUnavailable(String),
    #[error("Output unavailable: {0}")]
    OutputUnavailable(String),
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Model Error: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure inside one of the external models.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model not loaded: {0}")]
    NotLoaded(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Perspective correction could not be applied; callers keep the unaligned crop.
#[derive(Debug, Error, PartialEq)]
pub enum AlignmentError {
    #[error("no text quadrilateral found")]
    NotFound,
    #[error("quadrilateral has non-finite corners")]
    NonFinite,
    #[error("quadrilateral is degenerate (area {0:.2})")]
    Degenerate(f32),
    #[error("perspective transform is singular")]
    Singular,
    #[error("quadrilateral detector failed: {0}")]
    Detector(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("image encoding failed: {0}")]
    Encoding(#[from] image::ImageError),
}
