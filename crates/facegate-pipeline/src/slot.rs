//! The feature slot: one frame at native resolution, requested by the
//! feature worker and completed by the detection worker once the detection
//! buffer with the same frame id has been analysed.

use facegate_core::{DetectedFace, Image, PixelFormat};
use facegate_hw::FrameError;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A requested frame together with the face detected in it.
#[derive(Debug)]
pub struct Delivery {
    pub face: DetectedFace,
    pub image: Image,
}

/// What the detection worker's hand-off did to the pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// The buffer matched the requested frame; the feature worker was woken.
    Delivered,
    /// A newer frame arrived first; the request was abandoned.
    Superseded,
    /// No request pending, or the buffer is older than the slot frame.
    Ignored,
}

struct SlotState {
    requested: bool,
    /// Frame held in `image`; 0 when empty.
    frame_id: u64,
    filling: bool,
    image: Image,
    face: Option<DetectedFace>,
    closed: bool,
}

pub struct FeatureSlot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl FeatureSlot {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(SlotState {
                requested: false,
                frame_id: 0,
                filling: false,
                image: Image::allocate(width, height, PixelFormat::Rgb888),
                face: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Mark a request outstanding.
    pub fn request(&self) {
        let mut s = self.state.lock();
        s.requested = true;
        s.face = None;
    }

    /// Convert a frame into the slot if a request is outstanding and the slot
    /// is empty. Returns `Ok(false)` when the slot is busy and the frame was
    /// not taken. The conversion runs outside the slot lock.
    pub fn fill<F>(&self, frame_id: u64, convert: F) -> Result<bool, FrameError>
    where
        F: FnOnce(&mut Image) -> Result<(), FrameError>,
    {
        let mut image = {
            let mut s = self.state.lock();
            if s.closed || !s.requested || s.frame_id != 0 || s.filling {
                return Ok(false);
            }
            s.filling = true;
            std::mem::take(&mut s.image)
        };

        let result = convert(&mut image);

        let mut s = self.state.lock();
        s.image = image;
        s.filling = false;
        result?;
        if !s.requested || s.closed {
            return Ok(false);
        }
        s.frame_id = frame_id;
        Ok(true)
    }

    /// Hand over the face found in detection buffer `frame_id`.
    ///
    /// A newer frame only supersedes a request whose slot already holds a
    /// frame. While the slot is still empty nothing is superseded, so an
    /// armed or captured IR frame is left alone until the request is filled.
    pub fn deliver(&self, frame_id: u64, face: DetectedFace) -> DeliverOutcome {
        let mut s = self.state.lock();
        if !s.requested || s.closed || s.frame_id == 0 {
            return DeliverOutcome::Ignored;
        }
        if s.frame_id == frame_id {
            s.face = Some(face);
            s.frame_id = 0;
            s.requested = false;
            self.cond.notify_one();
            DeliverOutcome::Delivered
        } else if s.frame_id < frame_id {
            s.frame_id = 0;
            DeliverOutcome::Superseded
        } else {
            DeliverOutcome::Ignored
        }
    }

    /// Wait up to `timeout` for a delivery. `None` on timeout or close.
    ///
    /// The delivered image is lent to the caller and must come back through
    /// [`recycle`](Self::recycle) before the next [`request`](Self::request).
    pub fn wait(&self, timeout: Duration) -> Option<Delivery> {
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        while s.requested && !s.closed {
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                break;
            }
        }
        if s.requested || s.closed {
            return None;
        }
        let face = s.face.take()?;
        Some(Delivery {
            face,
            image: std::mem::take(&mut s.image),
        })
    }

    /// Return the storage of a delivered image.
    pub fn recycle(&self, image: Image) {
        self.state.lock().image = image;
    }

    pub fn close(&self) {
        let mut s = self.state.lock();
        s.closed = true;
        self.cond.notify_all();
    }

    /// Frame currently held, 0 when none.
    pub fn frame_id(&self) -> u64 {
        self.state.lock().frame_id
    }

    pub fn is_requested(&self) -> bool {
        self.state.lock().requested
    }
}
