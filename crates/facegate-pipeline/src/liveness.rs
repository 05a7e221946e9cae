//! IR liveness: the one-frame IR slot and the check run against it.
//!
//! The slot cycles `Canceled -> Prepared -> Complete -> Using -> Canceled`.
//! The IR camera callback may only write while `Prepared`; the feature
//! worker may only read while `Using`. Either side can cancel.

use crate::config::PipelineConfig;
use crate::detect::select_face;
use facegate_core::{Image, ImageView, PixelFormat, RecognitionEngine};
use facegate_hw::{FrameConverter, FrameError, Rotation};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrState {
    Canceled,
    Prepared,
    Complete,
    Using,
}

#[derive(Debug, thiserror::Error)]
pub enum IrCaptureError {
    #[error("IR slot is {0:?}, not prepared")]
    NotPrepared(IrState),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

struct IrSlot {
    state: IrState,
    image: Image,
}

pub struct IrLiveness {
    slot: Mutex<IrSlot>,
}

impl Default for IrLiveness {
    fn default() -> Self {
        Self::new()
    }
}

impl IrLiveness {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(IrSlot {
                state: IrState::Canceled,
                image: Image::default(),
            }),
        }
    }

    pub fn state(&self) -> IrState {
        self.slot.lock().state
    }

    /// Arm the slot for the next IR frame. Only valid from `Canceled`.
    pub fn prepare(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.state != IrState::Canceled {
            return false;
        }
        slot.state = IrState::Prepared;
        true
    }

    /// Copy an IR frame into the slot as grayscale, rotated by
    /// `rotation_degrees` (0, 90 or 270). The conversion runs outside the
    /// lock; a cancel that lands meanwhile wins.
    pub fn capture(
        &self,
        src: &ImageView<'_>,
        rotation_degrees: u32,
        converter: &dyn FrameConverter,
    ) -> Result<(), IrCaptureError> {
        let rotation = match Rotation::from_degrees(rotation_degrees)? {
            Rotation::Deg180 => return Err(FrameError::UnsupportedRotation(180).into()),
            r => r,
        };

        let mut image = {
            let mut slot = self.slot.lock();
            if slot.state != IrState::Prepared {
                return Err(IrCaptureError::NotPrepared(slot.state));
            }
            std::mem::take(&mut slot.image)
        };

        let (w, h) = rotation.rotated_dims(src.width, src.height);
        image.reshape(w, h, PixelFormat::Gray8);
        let result = converter.convert(src, rotation, &mut image);

        let mut slot = self.slot.lock();
        slot.image = image;
        result?;
        if slot.state == IrState::Prepared {
            slot.state = IrState::Complete;
        }
        Ok(())
    }

    /// Take the captured frame for a check. `None` unless `Complete`.
    pub fn begin_use(&self) -> Option<Image> {
        let mut slot = self.slot.lock();
        if slot.state != IrState::Complete {
            return None;
        }
        slot.state = IrState::Using;
        Some(std::mem::take(&mut slot.image))
    }

    /// Give the frame back after a check and cancel.
    pub fn finish(&self, image: Image) {
        let mut slot = self.slot.lock();
        slot.image = image;
        slot.state = IrState::Canceled;
    }

    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        if slot.state != IrState::Using {
            slot.state = IrState::Canceled;
        }
    }
}

/// Runs detection and anti-spoofing on a captured IR frame.
pub struct LivenessChecker {
    scratch: Image,
}

impl LivenessChecker {
    pub fn new(detect_width: u32, detect_height: u32) -> Self {
        Self {
            scratch: Image::allocate(detect_width, detect_height, PixelFormat::Rgb888),
        }
    }

    /// True when a face is found in `ir` and the engine scores it real.
    pub fn check(
        &mut self,
        ir: &Image,
        engine: &dyn RecognitionEngine,
        converter: &dyn FrameConverter,
        config: &PipelineConfig,
    ) -> bool {
        if let Err(e) = converter.convert(&ir.view(), Rotation::Deg0, &mut self.scratch) {
            tracing::warn!(error = %e, "IR frame conversion failed");
            return false;
        }
        let faces = match engine.detect(&self.scratch) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "IR detection failed");
                return false;
            }
        };
        let Some(face) = select_face(
            &faces,
            self.scratch.width,
            self.scratch.height,
            config.ir_score_threshold,
            config.min_face_width_divisor,
        ) else {
            tracing::debug!(candidates = faces.len(), "no usable face in IR frame");
            return false;
        };

        let ratio = ir.width.min(ir.height) as f32 / self.scratch.width.min(self.scratch.height) as f32;
        let bbox = face.bbox.scaled(ratio);
        match engine.assess_liveness(ir, &bbox) {
            Ok(score) => {
                let real = score >= config.real_score_threshold;
                tracing::debug!(score, real, "liveness assessed");
                real
            }
            Err(e) => {
                tracing::warn!(error = %e, "liveness assessment failed");
                false
            }
        }
    }
}
