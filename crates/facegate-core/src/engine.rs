//! Recognition engine contract.
//!
//! The detection, landmarking, alignment, embedding and liveness models are
//! supplied by the platform. The pipeline only talks to them through
//! [`RecognitionEngine`]; implementations must be shareable between the
//! detection and feature workers.

use crate::types::{DetectedFace, Embedding, FaceBox, Identity, Image, Landmarks, MatchResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    Init(String),
    #[error("licence rejected: {0}")]
    Licence(String),
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("tracking failed: {0}")]
    Tracking(String),
    #[error("landmark extraction failed: {0}")]
    Landmark(String),
    #[error("face alignment failed: {0}")]
    Alignment(String),
    #[error("feature extraction failed: {0}")]
    Extraction(String),
    #[error("gallery search failed: {0}")]
    Search(String),
    #[error("liveness assessment failed: {0}")]
    Liveness(String),
    #[error("gallery load failed: {0}")]
    Gallery(String),
}

/// Capabilities the pipeline needs from the face engine.
pub trait RecognitionEngine: Send + Sync {
    /// Bring up models and check the licence. Called once before the
    /// pipeline allocates anything; a failure aborts startup.
    fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Locate candidate faces. Track ids are not meaningful until [`track`](Self::track).
    fn detect(&self, image: &Image) -> Result<Vec<DetectedFace>, EngineError>;

    /// Associate `faces` with faces seen in previous frames, assigning track ids.
    fn track(&self, image: &Image, faces: &[DetectedFace]) -> Result<Vec<DetectedFace>, EngineError>;

    fn landmark(&self, image: &Image, bbox: &FaceBox) -> Result<Landmarks, EngineError>;

    /// Produce a normalized face crop suitable for [`extract_feature`](Self::extract_feature).
    fn align(&self, image: &Image, bbox: &FaceBox, landmarks: &Landmarks) -> Result<Image, EngineError>;

    fn extract_feature(&self, aligned: &Image) -> Result<Embedding, EngineError>;

    /// Search the loaded gallery. `Ok(None)` is a miss.
    fn search(&self, probe: &Embedding, threshold: f32) -> Result<Option<MatchResult>, EngineError>;

    /// Anti-spoofing score in [0, 1] for the face at `bbox` in an IR frame.
    fn assess_liveness(&self, image: &Image, bbox: &FaceBox) -> Result<f32, EngineError>;

    /// Replace the searchable gallery with `identities`.
    fn load_gallery(&self, identities: &[Identity]) -> Result<(), EngineError>;

    fn release_gallery(&self);
}
