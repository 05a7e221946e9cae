//! Detection worker: drains the ready queue, picks the face to follow and
//! hands new faces to the feature stage.

use crate::pipeline::PipelineState;
use crate::pool::DetectionBuffer;
use crate::slot::DeliverOutcome;
use crate::track::TrackOutcome;
use facegate_core::{DetectedFace, Image};
use std::time::Instant;

/// Outcome of analysing one detection buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Detection {
    Rejected,
    AlreadyTracked(DetectedFace),
    Fresh(DetectedFace),
}

/// Pick the largest face and keep it only if it is confident enough, wide
/// enough and fully inside the frame.
pub(crate) fn select_face(
    faces: &[DetectedFace],
    width: u32,
    height: u32,
    min_score: f32,
    min_width_divisor: u32,
) -> Option<DetectedFace> {
    let face = faces.iter().fold(None::<&DetectedFace>, |best, f| match best {
        Some(b) if b.bbox.area() >= f.bbox.area() => Some(b),
        _ => Some(f),
    })?;
    let min_width = (width / min_width_divisor.max(1)) as i32;
    if face.score < min_score || face.bbox.width() < min_width || !face.bbox.is_within(width, height) {
        return None;
    }
    Some(*face)
}

pub(crate) fn run(shared: &PipelineState) {
    tracing::info!("detection worker started");
    while shared.is_running() {
        let Some(mut buf) = shared.pool.next_ready() else {
            break;
        };
        if !shared.is_running() {
            break;
        }
        process(shared, &mut buf);
    }
    tracing::info!("detection worker stopped");
}

/// Analyse one buffer and update overlay, exposure, tracking and the
/// feature slot accordingly.
pub(crate) fn process(shared: &PipelineState, buf: &mut DetectionBuffer) {
    let detection = detect(shared, &buf.image);

    match detection {
        Detection::AlreadyTracked(face) | Detection::Fresh(face) => {
            let native = face.bbox.scaled(shared.ratio);
            shared.sinks.overlay.paint_box(Some(native));
            shared.sinks.exposure.set_region_of_interest(native);
            buf.face = Some(face);
        }
        Detection::Rejected => {
            shared.sinks.overlay.paint_box(None);
            shared.sinks.exposure.clear_region_of_interest();
            buf.face = None;
        }
    }

    match detection {
        Detection::Rejected => shared.track.lock().clear_name(),
        Detection::AlreadyTracked(face) => {
            tracing::trace!(frame = buf.frame_id, track = face.track_id, "face already tracked");
        }
        Detection::Fresh(face) => match shared.slot.deliver(buf.frame_id, face.scaled(shared.ratio)) {
            DeliverOutcome::Delivered => {
                tracing::trace!(frame = buf.frame_id, track = face.track_id, "face delivered");
            }
            DeliverOutcome::Superseded => {
                tracing::debug!(frame = buf.frame_id, "feature frame superseded");
                shared.ir.cancel();
            }
            DeliverOutcome::Ignored => {}
        },
    }
}

fn detect(shared: &PipelineState, image: &Image) -> Detection {
    shared
        .track
        .lock()
        .expire_stale(Instant::now(), shared.config.retrack_interval());

    let faces = match shared.engine.detect(image) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "detection failed");
            return Detection::Rejected;
        }
    };
    let faces = match shared.engine.track(image, &faces) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "tracking failed");
            return Detection::Rejected;
        }
    };

    let config = &shared.config;
    let Some(face) = select_face(
        &faces,
        image.width,
        image.height,
        config.rgb_score_threshold,
        config.min_face_width_divisor,
    ) else {
        return Detection::Rejected;
    };

    let session_pending = shared.sessions.lock().any_pending();
    match shared.track.lock().observe(face.track_id, session_pending) {
        TrackOutcome::New => Detection::Fresh(face),
        TrackOutcome::AlreadyTracked => Detection::AlreadyTracked(face),
    }
}
