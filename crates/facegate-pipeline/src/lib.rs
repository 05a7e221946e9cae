//! facegate-pipeline — Concurrent face access-control pipeline.
//!
//! Camera callbacks hand frames to [`FacialPipeline`]; a detection thread
//! picks and tracks the face in front of the device, a feature thread
//! recognizes it, checks IR liveness and drives enrollment and deletion
//! sessions. Results leave through the [`sinks`] traits.

pub mod audit;
pub mod config;
mod detect;
pub mod error;
mod feature;
pub mod gallery;
pub mod liveness;
mod pipeline;
pub mod pool;
pub mod session;
pub mod sinks;
pub mod slot;
pub mod track;

#[cfg(test)]
mod testing;

pub use audit::FileAuditRecorder;
pub use config::{ConfigError, PipelineConfig};
pub use error::{EnrollError, ExtractError, PipelineError, SubmitError};
pub use gallery::GalleryError;
pub use liveness::IrState;
pub use pipeline::FacialPipeline;
pub use pool::PoolStats;
pub use sinks::{
    AccessRecord, AccessStatus, AudioCue, AudioSink, AuditError, AuditRecorder, Collaborators, ExposureControl,
    Overlay, Silent, UserInfo,
};
