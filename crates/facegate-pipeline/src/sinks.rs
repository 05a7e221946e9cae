//! Outbound collaborators: the display overlay, the audio prompt player,
//! camera exposure control and the audit recorder. The pipeline never waits
//! on their outcome.

use crate::session::SessionEvent;
use chrono::{DateTime, Utc};
use facegate_core::{DetectedFace, FaceBox, Image, ListKind, PixelFormat};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCue {
    Welcome,
    AuthorizeFail,
    RegisterStart,
    RegisterTimeout,
    RegisterSuccess,
    RegisterAlready,
    RegisterLimit,
    DeleteStart,
    DeleteTimeout,
    DeleteSuccess,
    PleaseGoThrough,
}

impl From<SessionEvent> for AudioCue {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::RegisterStarted => AudioCue::RegisterStart,
            SessionEvent::RegisterTimedOut => AudioCue::RegisterTimeout,
            SessionEvent::RegisterLimitReached => AudioCue::RegisterLimit,
            SessionEvent::RegisterAlready => AudioCue::RegisterAlready,
            SessionEvent::RegisterSucceeded => AudioCue::RegisterSuccess,
            SessionEvent::DeleteStarted => AudioCue::DeleteStart,
            SessionEvent::DeleteTimedOut => AudioCue::DeleteTimeout,
            SessionEvent::DeleteSucceeded => AudioCue::DeleteSuccess,
        }
    }
}

/// What the overlay shows about a recognized face.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub id: u32,
    /// Stored name; by convention the path of the enrollment picture.
    pub name: String,
    pub list: ListKind,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Open,
    Close,
}

impl From<ListKind> for AccessStatus {
    fn from(list: ListKind) -> Self {
        match list {
            ListKind::Allow => AccessStatus::Open,
            ListKind::Deny => AccessStatus::Close,
        }
    }
}

/// One access decision, written when a new live identity is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRecord {
    pub id: u32,
    pub name: String,
    pub status: AccessStatus,
    pub list: ListKind,
    pub similarity: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot encode {0:?} snapshots")]
    Unsupported(PixelFormat),
}

pub trait Overlay: Send + Sync {
    /// Box of the current face in native coordinates, or `None` to clear.
    fn paint_box(&self, bbox: Option<FaceBox>);
    /// Identity panel; `real` is the liveness verdict.
    fn paint_info(&self, info: Option<&UserInfo>, real: bool);
}

pub trait AudioSink: Send + Sync {
    fn play(&self, cue: AudioCue);
}

pub trait ExposureControl: Send + Sync {
    /// Meter on the face at `bbox` (detection coordinates).
    fn set_region_of_interest(&self, bbox: FaceBox);
    fn clear_region_of_interest(&self);
}

pub trait AuditRecorder: Send + Sync {
    /// Write the enrollment picture of a new identity to `path`.
    fn save_enrollment(&self, image: &Image, path: &Path) -> Result<(), AuditError>;
    /// Snapshot of an unrecognized face.
    fn record_stranger(&self, image: &Image, face: &DetectedFace);
    fn record_access(&self, image: &Image, record: &AccessRecord);
}

/// Collaborator that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Overlay for Silent {
    fn paint_box(&self, _bbox: Option<FaceBox>) {}
    fn paint_info(&self, _info: Option<&UserInfo>, _real: bool) {}
}

impl AudioSink for Silent {
    fn play(&self, _cue: AudioCue) {}
}

impl ExposureControl for Silent {
    fn set_region_of_interest(&self, _bbox: FaceBox) {}
    fn clear_region_of_interest(&self) {}
}

impl AuditRecorder for Silent {
    fn save_enrollment(&self, _image: &Image, _path: &Path) -> Result<(), AuditError> {
        Ok(())
    }
    fn record_stranger(&self, _image: &Image, _face: &DetectedFace) {}
    fn record_access(&self, _image: &Image, _record: &AccessRecord) {}
}

/// The set of outbound collaborators handed to the pipeline at start.
#[derive(Clone)]
pub struct Collaborators {
    pub overlay: Arc<dyn Overlay>,
    pub audio: Arc<dyn AudioSink>,
    pub exposure: Arc<dyn ExposureControl>,
    pub audit: Arc<dyn AuditRecorder>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            overlay: Arc::new(Silent),
            audio: Arc::new(Silent),
            exposure: Arc::new(Silent),
            audit: Arc::new(Silent),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
