use crate::config::ConfigError;
use crate::gallery::GalleryError;
use facegate_core::EngineError;
use facegate_hw::FrameError;
use thiserror::Error;

/// Startup failures. Once the pipeline is running, per-frame failures are
/// absorbed by the workers and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("recognition engine: {0}")]
    Engine(#[from] EngineError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Why a frame handed over by a camera callback was not accepted.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("pipeline is not running")]
    NotRunning,
    #[error("frame id 0 is reserved")]
    InvalidFrameId,
    #[error("no free detection buffer; frame dropped")]
    PoolExhausted,
    #[error("IR liveness is not armed for a frame")]
    IrNotPrepared,
    #[error("frame conversion: {0}")]
    Frame(#[from] FrameError),
}

/// Feature extraction failure for a single face.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("landmark score {score} below {threshold}")]
    LowQuality { score: f32, threshold: f32 },
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

/// Enrollment from a picture on disk.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("no usable face in image")]
    NoFace,
    #[error("gallery is full ({0} identities)")]
    GalleryFull(usize),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("feature: {0}")]
    Extract(#[from] ExtractError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
}
