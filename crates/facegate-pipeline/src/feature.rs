//! Feature worker: requests native frames, extracts embeddings, searches the
//! gallery and carries out whatever the open session asks for.

use crate::error::ExtractError;
use crate::liveness::LivenessChecker;
use crate::pipeline::PipelineState;
use crate::session::{SessionEvent, SessionTicks};
use crate::sinks::{AccessRecord, AccessStatus, AudioCue, UserInfo};
use crate::slot::Delivery;
use chrono::Utc;
use facegate_core::{DetectedFace, Embedding, FaceBox, Identity, Image, ListKind, MatchResult, RecognitionEngine};
use std::path::PathBuf;
use std::time::Instant;

/// Landmark, align and extract the face at `bbox`. Faces whose landmark
/// score is below `min_landmark_score` are refused.
pub(crate) fn extract_embedding(
    engine: &dyn RecognitionEngine,
    image: &Image,
    bbox: &FaceBox,
    min_landmark_score: f32,
) -> Result<Embedding, ExtractError> {
    let landmarks = engine.landmark(image, bbox)?;
    if landmarks.score < min_landmark_score {
        return Err(ExtractError::LowQuality {
            score: landmarks.score,
            threshold: min_landmark_score,
        });
    }
    let aligned = engine.align(image, bbox, &landmarks)?;
    Ok(engine.extract_feature(&aligned)?)
}

pub(crate) fn run(shared: &PipelineState) {
    tracing::info!("feature worker started");
    let mut worker = FeatureWorker::new(shared);
    while shared.is_running() {
        worker.cycle();
    }
    tracing::info!("feature worker stopped");
}

pub(crate) struct FeatureWorker<'a> {
    shared: &'a PipelineState,
    liveness: LivenessChecker,
    last_stranger: Option<Instant>,
}

impl<'a> FeatureWorker<'a> {
    pub(crate) fn new(shared: &'a PipelineState) -> Self {
        let config = &shared.config;
        Self {
            shared,
            liveness: LivenessChecker::new(config.detect_width, config.detect_height),
            last_stranger: None,
        }
    }

    /// One request/wait/process round. Also the session clock.
    pub(crate) fn cycle(&mut self) {
        let s = self.shared;
        s.slot.request();
        s.ir.cancel();

        let delivery = s.slot.wait(s.config.feature_wait());
        if !s.is_running() {
            if let Some(d) = delivery {
                s.slot.recycle(d.image);
            }
            return;
        }

        let ticks = self.tick_sessions();
        let Some(delivery) = delivery else {
            return;
        };

        if !self.handle(&delivery, ticks) {
            s.track.lock().forget();
        }
        s.slot.recycle(delivery.image);
    }

    pub(crate) fn tick_sessions(&self) -> SessionTicks {
        let s = self.shared;
        let enrolled = s.gallery.len();
        let (ticks, events) = s.sessions.lock().tick(enrolled, s.gallery.capacity());
        for event in events {
            self.announce(event);
        }
        ticks
    }

    /// Process a delivered frame. Returns the liveness verdict; `false`
    /// makes the next frame of the same face go through recognition again.
    pub(crate) fn handle(&mut self, delivery: &Delivery, ticks: SessionTicks) -> bool {
        let s = self.shared;
        let face = &delivery.face;
        let hit = self.recognize(&delivery.image, face, ticks);

        let deleting = ticks.deletion > 0 && s.sessions.lock().deletion_pending();
        match hit {
            Some(hit) if deleting => {
                self.delete(&hit);
                false
            }
            Some(hit) if face.score > s.config.rgb_score_threshold => self.confirm(&delivery.image, hit),
            _ => {
                s.sinks.overlay.paint_info(None, false);
                false
            }
        }
    }

    /// Extract and search. A miss may enroll the face or record a stranger.
    fn recognize(&mut self, image: &Image, face: &DetectedFace, ticks: SessionTicks) -> Option<MatchResult> {
        let s = self.shared;
        let config = &s.config;

        let embedding = match extract_embedding(s.engine.as_ref(), image, &face.bbox, config.landmark_score_running) {
            Ok(embedding) => embedding,
            Err(ExtractError::LowQuality { score, .. }) => {
                tracing::debug!(score, "landmarks too weak, face skipped");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "feature extraction failed");
                return None;
            }
        };

        match s.gallery.search(&embedding, config.similarity_threshold) {
            Ok(Some(hit)) => {
                let event = s.sessions.lock().note_registration_hit(config.register_repeat_limit);
                if let Some(event) = event {
                    tracing::info!(id = hit.id, "face already registered");
                    self.announce(event);
                }
                return Some(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "gallery search failed"),
        }

        let registering = ticks.registration > 0 && s.sessions.lock().registration_pending();
        if registering && face.score > config.register_score_threshold && !s.gallery.is_full() {
            if let Some(dir) = s.store.allow_list_dir() {
                self.enroll(image, embedding, dir);
                return None;
            }
        }

        self.stranger(image, face);
        None
    }

    fn enroll(&self, image: &Image, embedding: Embedding, dir: PathBuf) {
        let s = self.shared;
        let id = match s.store.next_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "cannot allocate identity id");
                return;
            }
        };
        let path = dir.join(format!("{}_{id}.jpg", s.config.enrollment_prefix));
        if let Err(e) = s.sinks.audit.save_enrollment(image, &path) {
            tracing::warn!(id, path = %path.display(), error = %e, "failed to save enrollment picture");
        }
        let identity = Identity {
            id,
            name: path.to_string_lossy().into_owned(),
            embedding,
        };
        match s.gallery.enroll(identity) {
            Ok(()) => {
                let event = s.sessions.lock().complete_registration();
                self.announce(event);
            }
            Err(e) => tracing::warn!(id, error = %e, "enrollment failed"),
        }
    }

    fn stranger(&mut self, image: &Image, face: &DetectedFace) {
        let s = self.shared;
        let now = Instant::now();
        let due = self
            .last_stranger
            .map_or(true, |t| now.saturating_duration_since(t) >= s.config.stranger_snapshot_interval());
        if due {
            self.last_stranger = Some(now);
            s.sinks.audit.record_stranger(image, face);
        }
    }

    fn delete(&self, hit: &MatchResult) {
        let s = self.shared;
        match s.gallery.remove(hit.id) {
            Ok(removed) => {
                if !removed {
                    tracing::debug!(id = hit.id, "identity already gone");
                }
                let event = s.sessions.lock().complete_deletion();
                self.announce(event);
                s.sinks.overlay.paint_info(None, false);
            }
            Err(e) => tracing::warn!(id = hit.id, error = %e, "deletion failed"),
        }
    }

    /// Look the hit up, check liveness and report. Writes an access record
    /// the first time a live identity is confirmed.
    fn confirm(&mut self, image: &Image, hit: MatchResult) -> bool {
        let s = self.shared;
        let name = match s.store.exists(hit.id) {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::debug!(id = hit.id, "gallery hit has no stored identity");
                return false;
            }
            Err(e) => {
                tracing::warn!(id = hit.id, error = %e, "identity lookup failed");
                return false;
            }
        };

        let mut real = false;
        if s.ir_camera_running() {
            if let Some(ir) = s.ir.begin_use() {
                real = self
                    .liveness
                    .check(&ir, s.engine.as_ref(), s.converter.as_ref(), &s.config);
                s.ir.finish(ir);
            }
        }

        let list = ListKind::classify(&name, &s.config.deny_list_marker);
        let info = UserInfo {
            id: hit.id,
            name: name.clone(),
            list,
            similarity: hit.similarity,
        };
        s.sinks.overlay.paint_info(Some(&info), real);

        let registering = s.sessions.lock().registration_pending();
        if real && !registering && s.track.lock().confirm(&name) {
            let status = AccessStatus::from(list);
            tracing::info!(id = hit.id, name = %name, ?status, similarity = hit.similarity, "access decision");
            if list == ListKind::Allow {
                s.sinks.audio.play(AudioCue::PleaseGoThrough);
            }
            s.sinks.audit.record_access(
                image,
                &AccessRecord {
                    id: hit.id,
                    name,
                    status,
                    list,
                    similarity: hit.similarity,
                    timestamp: Utc::now(),
                },
            );
        }
        real
    }

    fn announce(&self, event: SessionEvent) {
        tracing::info!(?event, "session");
        self.shared.sinks.audio.play(AudioCue::from(event));
    }
}
