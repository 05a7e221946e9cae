//! facegate-hw — Frame handoff from camera callbacks.
//!
//! Provides rotation-aware software conversion of camera frames into the
//! analysis buffers owned by the pipeline.

pub mod frame;

pub use frame::{FrameConverter, FrameError, Rotation, SoftwareConverter};
