//! The facial pipeline: camera callbacks on one side, two worker threads on
//! the other.
//!
//! ```text
//! submit_frame ──► BufferPool ──► detection thread ──► FeatureSlot ──► feature thread
//!        └──────────────────────────────────────────────────┘              │
//! submit_ir_frame ──► IrLiveness ◄─────────────────────────────────────────┘
//! ```

use crate::config::PipelineConfig;
use crate::detect::{self, select_face};
use crate::error::{EnrollError, PipelineError, SubmitError};
use crate::feature::{self, extract_embedding};
use crate::gallery::{Gallery, GalleryError};
use crate::liveness::{IrCaptureError, IrLiveness, IrState};
use crate::pool::{BufferPool, PoolStats};
use crate::session::Sessions;
use crate::sinks::{AudioCue, Collaborators};
use crate::slot::FeatureSlot;
use crate::track::TrackState;
use facegate_core::{Identity, IdentityStore, Image, ImageView, PixelFormat, RecognitionEngine};
use facegate_hw::{FrameConverter, Rotation};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// State shared by the camera callbacks and both workers.
pub(crate) struct PipelineState {
    pub(crate) config: PipelineConfig,
    /// Detection to native coordinate factor.
    pub(crate) ratio: f32,
    pub(crate) engine: Arc<dyn RecognitionEngine>,
    pub(crate) store: Arc<dyn IdentityStore>,
    pub(crate) converter: Arc<dyn FrameConverter>,
    pub(crate) sinks: Collaborators,
    pub(crate) pool: BufferPool,
    pub(crate) slot: FeatureSlot,
    pub(crate) ir: IrLiveness,
    pub(crate) gallery: Gallery,
    pub(crate) track: Mutex<TrackState>,
    pub(crate) sessions: Mutex<Sessions>,
    running: AtomicBool,
    ir_camera_running: AtomicBool,
}

impl PipelineState {
    /// Validate the configuration, load the gallery and allocate buffers.
    pub(crate) fn new(
        config: PipelineConfig,
        engine: Arc<dyn RecognitionEngine>,
        store: Arc<dyn IdentityStore>,
        converter: Arc<dyn FrameConverter>,
        sinks: Collaborators,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let gallery = Gallery::new(engine.clone(), store.clone(), config.gallery_capacity);
        gallery.rebuild()?;

        Ok(Self {
            ratio: config.scale_ratio(),
            pool: BufferPool::new(
                config.pool_capacity,
                config.detect_width,
                config.detect_height,
                PixelFormat::Rgb888,
            ),
            slot: FeatureSlot::new(config.native_width, config.native_height),
            ir: IrLiveness::new(),
            gallery,
            track: Mutex::new(TrackState::new()),
            sessions: Mutex::new(Sessions::new(config.session_tick_limit)),
            running: AtomicBool::new(true),
            ir_camera_running: AtomicBool::new(false),
            config,
            engine,
            store,
            converter,
            sinks,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn ir_camera_running(&self) -> bool {
        self.ir_camera_running.load(Ordering::Acquire)
    }

    pub(crate) fn set_ir_camera_running(&self, running: bool) {
        self.ir_camera_running.store(running, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.pool.close();
        self.slot.close();
        self.ir.cancel();
    }
}

/// A running pipeline. Dropping it stops and joins both workers.
pub struct FacialPipeline {
    shared: Arc<PipelineState>,
    detect_thread: Option<JoinHandle<()>>,
    feature_thread: Option<JoinHandle<()>>,
}

impl FacialPipeline {
    /// Initialize the engine, load the gallery, allocate buffers and start
    /// both workers. An engine that fails to initialize is announced with
    /// [`AudioCue::AuthorizeFail`].
    ///
    /// Nothing is left running if any step fails.
    pub fn start(
        config: PipelineConfig,
        engine: Arc<dyn RecognitionEngine>,
        store: Arc<dyn IdentityStore>,
        converter: Arc<dyn FrameConverter>,
        sinks: Collaborators,
    ) -> Result<Self, PipelineError> {
        if let Err(e) = engine.initialize() {
            tracing::error!(error = %e, "recognition engine failed to initialize");
            sinks.audio.play(AudioCue::AuthorizeFail);
            return Err(e.into());
        }

        let shared = match PipelineState::new(config, engine, store, converter, sinks) {
            Ok(state) => Arc::new(state),
            Err(e) => {
                tracing::error!(error = %e, "facial pipeline failed to start");
                return Err(e);
            }
        };

        let mut pipeline = Self {
            shared: Arc::clone(&shared),
            detect_thread: None,
            feature_thread: None,
        };
        // on failure `pipeline` drops here, joining whatever was spawned
        pipeline.detect_thread = Some(spawn_worker("facegate-detect", &shared, detect::run)?);
        pipeline.feature_thread = Some(spawn_worker("facegate-feature", &shared, feature::run)?);

        let c = &shared.config;
        tracing::info!(
            native = %format!("{}x{}", c.native_width, c.native_height),
            detect = %format!("{}x{}", c.detect_width, c.detect_height),
            pool = c.pool_capacity,
            gallery = shared.gallery.len(),
            "facial pipeline started"
        );
        shared.sinks.audio.play(AudioCue::Welcome);
        Ok(pipeline)
    }

    /// Hand over a visible-light frame. Fills the feature slot first when
    /// the feature worker is waiting for one, then queues the frame for
    /// detection. `frame_id` must be non-zero and increasing.
    pub fn submit_frame(&self, frame: &ImageView<'_>, rotation_degrees: u32, frame_id: u64) -> Result<(), SubmitError> {
        let s = &self.shared;
        if !s.is_running() {
            return Err(SubmitError::NotRunning);
        }
        if frame_id == 0 {
            return Err(SubmitError::InvalidFrameId);
        }
        let rotation = Rotation::from_degrees(rotation_degrees)?;

        s.slot
            .fill(frame_id, |image| s.converter.convert(frame, rotation, image))?;

        let mut buf = s.pool.acquire().ok_or(SubmitError::PoolExhausted)?;
        s.converter.convert(frame, rotation, &mut buf.image)?;
        buf.frame_id = frame_id;
        buf.publish();
        Ok(())
    }

    /// Arm IR liveness for the next IR frame. `false` if already armed or in use.
    pub fn arm_ir(&self) -> bool {
        self.shared.ir.prepare()
    }

    /// Hand over an IR frame. Accepted only while armed.
    pub fn submit_ir_frame(&self, frame: &ImageView<'_>, rotation_degrees: u32) -> Result<(), SubmitError> {
        let s = &self.shared;
        if !s.is_running() {
            return Err(SubmitError::NotRunning);
        }
        s.ir
            .capture(frame, rotation_degrees, s.converter.as_ref())
            .map_err(|e| match e {
                IrCaptureError::NotPrepared(_) => SubmitError::IrNotPrepared,
                IrCaptureError::Frame(e) => SubmitError::Frame(e),
            })
    }

    /// Liveness is only checked while the IR camera reports running.
    pub fn set_ir_camera_running(&self, running: bool) {
        tracing::info!(running, "IR camera state changed");
        self.shared.set_ir_camera_running(running);
    }

    pub fn request_registration(&self) {
        tracing::info!("registration requested");
        self.shared.sessions.lock().request_registration();
    }

    pub fn request_deletion(&self) {
        tracing::info!("deletion requested");
        self.shared.sessions.lock().request_deletion();
    }

    /// Enroll the face in the picture at `path` as identity `id`. The path
    /// becomes the identity's name.
    pub fn enroll_from_image(&self, id: u32, path: &Path) -> Result<(), EnrollError> {
        let s = &self.shared;
        if s.gallery.is_full() {
            return Err(EnrollError::GalleryFull(s.gallery.capacity()));
        }

        let rgb = image::open(path)?.to_rgb8();
        let image = Image {
            width: rgb.width(),
            height: rgb.height(),
            format: PixelFormat::Rgb888,
            data: rgb.into_raw(),
        };

        let faces = s.engine.detect(&image)?;
        let face = select_face(
            &faces,
            image.width,
            image.height,
            s.config.rgb_score_threshold,
            s.config.min_face_width_divisor,
        )
        .ok_or(EnrollError::NoFace)?;
        let embedding = extract_embedding(s.engine.as_ref(), &image, &face.bbox, s.config.landmark_score_image)?;

        s.gallery.enroll(Identity {
            id,
            name: path.to_string_lossy().into_owned(),
            embedding,
        })?;
        Ok(())
    }

    /// Delete identity `id` and its enrollment picture. `Ok(false)` if unknown.
    pub fn remove_identity(&self, id: u32) -> Result<bool, GalleryError> {
        self.shared.gallery.remove(id)
    }

    /// Reload the gallery from the store. Returns the number loaded.
    pub fn reload_gallery(&self) -> Result<usize, GalleryError> {
        self.shared.gallery.rebuild()
    }

    pub fn gallery_len(&self) -> usize {
        self.shared.gallery.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn ir_state(&self) -> IrState {
        self.shared.ir.state()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Stop both workers, wait for them and release the engine gallery.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if !self.shared.is_running() {
            return;
        }
        self.shared.stop();
        for handle in [self.detect_thread.take(), self.feature_thread.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "worker panicked");
            }
        }
        self.shared.gallery.release();
        tracing::info!("facial pipeline stopped");
    }
}

impl Drop for FacialPipeline {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn spawn_worker(
    name: &'static str,
    shared: &Arc<PipelineState>,
    body: fn(&PipelineState),
) -> Result<JoinHandle<()>, PipelineError> {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || body(&shared))
        .map_err(|source| {
            tracing::error!(thread = name, error = %source, "failed to spawn worker");
            PipelineError::Spawn { name, source }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::AccessStatus;
    use crate::testing::{eventually, face_at, gray_frame, one_hot, test_config, FaceScript, Recorder, ScriptedEngine};
    use facegate_core::{EngineError, ListKind, SqliteStore, StoreError};
    use facegate_hw::SoftwareConverter;
    use std::path::PathBuf;
    use std::time::Duration;

    const ALICE: u8 = 10;
    const STRANGER: u8 = 11;
    const IR_REAL: u8 = 20;

    struct Harness {
        pipeline: FacialPipeline,
        engine: Arc<ScriptedEngine>,
        store: Arc<SqliteStore>,
        recorder: Arc<Recorder>,
        next_frame: u64,
    }

    impl Harness {
        fn start(config: PipelineConfig, seed: &[Identity]) -> Self {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
            let engine = Arc::new(ScriptedEngine::new());
            engine.script(ALICE, FaceScript::visible(face_at(0.9, 1)));
            engine.script(STRANGER, FaceScript::visible(face_at(0.995, 2)));
            engine.script(IR_REAL, FaceScript::ir(face_at(0.8, 1), 0.95));

            let store = Arc::new(SqliteStore::open_in_memory(Some(PathBuf::from("/data/white_list"))).unwrap());
            for identity in seed {
                store.insert(identity).unwrap();
            }
            let recorder = Arc::new(Recorder::default());
            let pipeline = FacialPipeline::start(
                config,
                engine.clone(),
                store.clone(),
                Arc::new(SoftwareConverter),
                recorder.collaborators(),
            )
            .unwrap();
            Self {
                pipeline,
                engine,
                store,
                recorder,
                next_frame: 0,
            }
        }

        /// Feed frames of `key` (and IR frames when `ir` is set) until `done`.
        fn drive(&mut self, key: u8, ir: Option<u8>, mut done: impl FnMut(&Self) -> bool) -> bool {
            let c = self.pipeline.config();
            let frame = gray_frame(key, c.native_width, c.native_height);
            let ir_frame = ir.map(|k| gray_frame(k, c.native_width, c.native_height));
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while std::time::Instant::now() < deadline {
                if let Some(ir_frame) = &ir_frame {
                    self.pipeline.arm_ir();
                    let _ = self.pipeline.submit_ir_frame(&ir_frame.view(), 0);
                }
                self.next_frame += 1;
                let _ = self.pipeline.submit_frame(&frame.view(), 0, self.next_frame);
                if done(self) {
                    return true;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            false
        }
    }

    fn alice(name: &str) -> Identity {
        Identity {
            id: 1,
            name: name.into(),
            embedding: one_hot(ALICE),
        }
    }

    #[test]
    fn test_start_loads_gallery_and_welcomes() {
        let h = Harness::start(test_config(), &[alice("/data/white_list/user_1.jpg")]);
        assert_eq!(h.pipeline.gallery_len(), 1);
        assert_eq!(h.engine.gallery_len(), 1);
        assert_eq!(h.recorder.cues(), vec![AudioCue::Welcome]);
        let stats = h.pipeline.pool_stats();
        assert_eq!(stats.capacity, 2);
    }

    #[test]
    fn test_invalid_config_fails_start() {
        let config = PipelineConfig {
            pool_capacity: 0,
            ..test_config()
        };
        let result = FacialPipeline::start(
            config,
            Arc::new(ScriptedEngine::new()),
            Arc::new(SqliteStore::open_in_memory(None).unwrap()),
            Arc::new(SoftwareConverter),
            Collaborators::default(),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_engine_init_failure_is_fatal_and_announced() {
        for failure in [
            EngineError::Licence("expired".into()),
            EngineError::Init("model missing".into()),
        ] {
            let engine = Arc::new(ScriptedEngine::new());
            engine.fail_initialize(failure);
            let recorder = Arc::new(Recorder::default());
            let result = FacialPipeline::start(
                test_config(),
                engine.clone(),
                Arc::new(SqliteStore::open_in_memory(None).unwrap()),
                Arc::new(SoftwareConverter),
                recorder.collaborators(),
            );
            assert!(matches!(result, Err(PipelineError::Engine(_))));
            assert_eq!(recorder.cues(), vec![AudioCue::AuthorizeFail]);
            assert_eq!(engine.gallery_len(), 0);
        }
    }

    #[test]
    fn test_frame_id_zero_is_rejected() {
        let h = Harness::start(test_config(), &[]);
        let frame = gray_frame(ALICE, 360, 640);
        assert!(matches!(
            h.pipeline.submit_frame(&frame.view(), 0, 0),
            Err(SubmitError::InvalidFrameId)
        ));
        assert!(matches!(
            h.pipeline.submit_frame(&frame.view(), 45, 1),
            Err(SubmitError::Frame(_))
        ));
    }

    #[test]
    fn test_ir_frame_requires_arming() {
        let h = Harness::start(test_config(), &[]);
        let frame = gray_frame(IR_REAL, 360, 640);
        assert!(matches!(
            h.pipeline.submit_ir_frame(&frame.view(), 0),
            Err(SubmitError::IrNotPrepared)
        ));
    }

    #[test]
    fn test_live_registration() {
        let mut h = Harness::start(test_config(), &[]);
        h.pipeline.request_registration();
        assert!(h.drive(STRANGER, None, |h| h.store.exists(1).unwrap().is_some()));

        assert!(eventually(|| h.recorder.cues().contains(&AudioCue::RegisterSuccess)));
        let cues = h.recorder.cues();
        assert!(cues.contains(&AudioCue::RegisterStart));
        assert_eq!(h.pipeline.gallery_len(), 1);
        assert_eq!(h.recorder.enrollments(), vec![PathBuf::from("/data/white_list/user_1.jpg")]);
    }

    #[test]
    fn test_live_access_with_ir() {
        // each feature cycle cancels IR, so the wait must outlast an IR capture
        let config = PipelineConfig {
            feature_wait_ms: 200,
            ..test_config()
        };
        let mut h = Harness::start(config, &[alice("/data/white_list/user_1.jpg")]);
        h.pipeline.set_ir_camera_running(true);
        assert!(h.drive(ALICE, Some(IR_REAL), |h| !h.recorder.access().is_empty()));

        let record = &h.recorder.access()[0];
        assert_eq!(record.id, 1);
        assert_eq!(record.status, AccessStatus::Open);
        assert_eq!(record.list, ListKind::Allow);
        assert!(h.recorder.cues().contains(&AudioCue::PleaseGoThrough));
    }

    #[test]
    fn test_no_access_without_ir_camera() {
        let mut h = Harness::start(test_config(), &[alice("/data/white_list/user_1.jpg")]);
        assert!(h.drive(ALICE, Some(IR_REAL), |h| h.recorder.infos().len() >= 3));
        assert!(h.recorder.access().is_empty());
        assert!(h.recorder.infos().iter().all(|&(id, real)| id == Some(1) && !real));
    }

    #[test]
    fn test_live_deletion() {
        let mut h = Harness::start(test_config(), &[alice("/data/white_list/user_1.jpg")]);
        h.pipeline.request_deletion();
        assert!(h.drive(ALICE, None, |h| h.store.exists(1).unwrap().is_none()));
        assert!(eventually(|| h.recorder.cues().contains(&AudioCue::DeleteSuccess)));
        assert_eq!(h.pipeline.gallery_len(), 0);
    }

    #[test]
    fn test_deletion_times_out_without_frames() {
        let config = PipelineConfig {
            session_tick_limit: 3,
            feature_wait_ms: 5,
            ..test_config()
        };
        let h = Harness::start(config, &[]);
        h.pipeline.request_deletion();
        assert!(eventually(|| h.recorder.cues().contains(&AudioCue::DeleteTimeout)));
        std::thread::sleep(Duration::from_millis(50));
        let cues = h.recorder.cues();
        assert_eq!(cues.iter().filter(|&&c| c == AudioCue::DeleteTimeout).count(), 1);
        assert!(!cues.contains(&AudioCue::DeleteSuccess));
    }

    #[test]
    fn test_deletion_times_out_while_unknown_face_is_shown() {
        let config = PipelineConfig {
            session_tick_limit: 20,
            ..test_config()
        };
        let mut h = Harness::start(config, &[alice("/data/white_list/user_1.jpg")]);
        h.pipeline.request_deletion();
        assert!(h.drive(STRANGER, None, |h| h.recorder.cues().contains(&AudioCue::DeleteTimeout)));

        assert!(!h.recorder.cues().contains(&AudioCue::DeleteSuccess));
        assert!(h.recorder.strangers() > 0);
        assert!(h.store.exists(1).unwrap().is_some());
        assert_eq!(h.pipeline.gallery_len(), 1);
    }

    #[test]
    fn test_registration_at_capacity_reports_limit() {
        let config = PipelineConfig {
            gallery_capacity: 1,
            ..test_config()
        };
        let mut h = Harness::start(config, &[alice("/data/white_list/user_1.jpg")]);
        h.pipeline.request_registration();
        assert!(eventually(|| h.recorder.cues().contains(&AudioCue::RegisterLimit)));
        assert!(!h.recorder.cues().contains(&AudioCue::RegisterStart));

        h.drive(STRANGER, None, |h| h.recorder.strangers() > 0);
        assert_eq!(h.store.next_id().unwrap(), 2);
    }

    #[test]
    fn test_low_score_faces_never_reach_recognition() {
        let mut h = Harness::start(test_config(), &[]);
        h.engine.script(30, FaceScript::visible(face_at(0.3, 3)));
        let mut frames = 0;
        h.drive(30, None, |_| {
            frames += 1;
            frames > 20
        });
        assert!(eventually(|| h.recorder.boxes().len() >= 5));
        assert!(h.recorder.boxes().iter().all(Option::is_none));
        assert!(h.recorder.infos().is_empty());
        assert_eq!(h.recorder.strangers(), 0);
    }

    #[test]
    fn test_rotated_frames_are_accepted() {
        let config = PipelineConfig {
            native_width: 640,
            native_height: 360,
            detect_width: 640,
            detect_height: 360,
            ..test_config()
        };
        let h = Harness::start(config, &[]);
        let frame = gray_frame(ALICE, 360, 640);
        h.pipeline.submit_frame(&frame.view(), 90, 1).unwrap();
    }

    #[test]
    fn test_enroll_from_image_and_remove() {
        let h = Harness::start(test_config(), &[]);
        let dir = std::env::temp_dir().join(format!("facegate-enroll-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("user_9.png");
        image::GrayImage::from_pixel(360, 640, image::Luma([0u8])).save(&path).unwrap();
        h.engine.script(0, FaceScript::visible(face_at(0.9, 1)));

        h.pipeline.enroll_from_image(9, &path).unwrap();
        assert_eq!(h.pipeline.gallery_len(), 1);
        assert_eq!(h.store.exists(9).unwrap().as_deref(), Some(path.to_string_lossy().as_ref()));

        assert!(h.pipeline.remove_identity(9).unwrap());
        assert!(!path.exists());
        assert_eq!(h.pipeline.gallery_len(), 0);
        assert!(!h.pipeline.remove_identity(9).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_enroll_from_image_keeps_existing_identity() {
        let h = Harness::start(test_config(), &[alice("/data/white_list/user_1.jpg")]);
        let dir = std::env::temp_dir().join(format!("facegate-dup-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("other.png");
        image::GrayImage::from_pixel(360, 640, image::Luma([0u8])).save(&path).unwrap();
        h.engine.script(0, FaceScript::visible(face_at(0.9, 1)));

        assert!(matches!(
            h.pipeline.enroll_from_image(1, &path),
            Err(EnrollError::Gallery(GalleryError::Store(StoreError::Duplicate(1))))
        ));
        assert_eq!(h.store.exists(1).unwrap().as_deref(), Some("/data/white_list/user_1.jpg"));
        assert_eq!(h.pipeline.gallery_len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_enroll_from_image_without_face() {
        let h = Harness::start(test_config(), &[]);
        let dir = std::env::temp_dir().join(format!("facegate-noface-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.png");
        image::GrayImage::from_pixel(64, 64, image::Luma([5u8])).save(&path).unwrap();

        assert!(matches!(h.pipeline.enroll_from_image(9, &path), Err(EnrollError::NoFace)));
        assert!(matches!(
            h.pipeline.enroll_from_image(9, &dir.join("missing.png")),
            Err(EnrollError::Image(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reload_picks_up_store_changes() {
        let h = Harness::start(test_config(), &[]);
        h.store.insert(&alice("/data/white_list/user_1.jpg")).unwrap();
        assert_eq!(h.pipeline.gallery_len(), 0);
        assert_eq!(h.pipeline.reload_gallery().unwrap(), 1);
        assert_eq!(h.engine.gallery_len(), 1);
    }

    #[test]
    fn test_shutdown_joins_workers_and_releases_gallery() {
        let mut h = Harness::start(test_config(), &[alice("/data/white_list/user_1.jpg")]);
        h.drive(ALICE, None, |h| !h.recorder.infos().is_empty());
        let engine = h.engine.clone();
        h.pipeline.shutdown();
        assert_eq!(engine.gallery_len(), 0);
    }
}
