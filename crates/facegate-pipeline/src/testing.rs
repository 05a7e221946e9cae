//! Test doubles: a scripted engine keyed on the first pixel byte and a
//! collaborator that records everything it is told.

use crate::config::PipelineConfig;
use crate::pipeline::PipelineState;
use crate::sinks::{AccessRecord, AudioCue, AudioSink, AuditError, AuditRecorder, Collaborators, ExposureControl, Overlay, UserInfo};
use facegate_core::{
    DetectedFace, Embedding, EngineError, FaceBox, Identity, Image, Landmarks, MatchResult, PixelFormat,
    RecognitionEngine, SqliteStore,
};
use facegate_hw::SoftwareConverter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Images whose first byte is this make the engine fail.
pub(crate) const FAIL_KEY: u8 = 255;

const EMBEDDING_DIM: usize = 256;

pub(crate) fn one_hot(key: u8) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[key as usize] = 1.0;
    Embedding::new(values)
}

pub(crate) fn gray_frame(key: u8, width: u32, height: u32) -> Image {
    let mut image = Image::allocate(width, height, PixelFormat::Gray8);
    image.data.fill(key);
    image
}

/// A face comfortably inside a 360x640 frame.
pub(crate) fn face_at(score: f32, track_id: i32) -> DetectedFace {
    DetectedFace {
        bbox: FaceBox::new(100, 200, 260, 400),
        score,
        track_id,
    }
}

pub(crate) fn test_config() -> PipelineConfig {
    PipelineConfig {
        native_width: 360,
        native_height: 640,
        detect_width: 360,
        detect_height: 640,
        feature_wait_ms: 10,
        session_tick_limit: 1000,
        ..PipelineConfig::default()
    }
}

/// Poll `check` for up to five seconds.
pub(crate) fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// What the engine reports for images carrying a given key.
#[derive(Debug, Clone)]
pub(crate) struct FaceScript {
    pub faces: Vec<DetectedFace>,
    pub liveness: f32,
    pub landmark_score: f32,
}

impl Default for FaceScript {
    fn default() -> Self {
        Self {
            faces: Vec::new(),
            liveness: 0.0,
            landmark_score: 0.95,
        }
    }
}

impl FaceScript {
    pub fn visible(face: DetectedFace) -> Self {
        Self {
            faces: vec![face],
            ..Self::default()
        }
    }

    pub fn ir(face: DetectedFace, liveness: f32) -> Self {
        Self {
            faces: vec![face],
            liveness,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    scripts: Mutex<HashMap<u8, FaceScript>>,
    gallery: Mutex<Vec<Identity>>,
    init_failure: Mutex<Option<EngineError>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, key: u8, script: FaceScript) {
        self.scripts.lock().insert(key, script);
    }

    /// Make the next `initialize` fail with `error`.
    pub fn fail_initialize(&self, error: EngineError) {
        *self.init_failure.lock() = Some(error);
    }

    pub fn gallery_len(&self) -> usize {
        self.gallery.lock().len()
    }

    fn lookup(&self, image: &Image) -> Result<FaceScript, String> {
        let key = image.data.first().copied().unwrap_or(0);
        if key == FAIL_KEY {
            return Err(format!("scripted failure for key {key}"));
        }
        Ok(self.scripts.lock().get(&key).cloned().unwrap_or_default())
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn initialize(&self) -> Result<(), EngineError> {
        match self.init_failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn detect(&self, image: &Image) -> Result<Vec<DetectedFace>, EngineError> {
        Ok(self.lookup(image).map_err(EngineError::Detection)?.faces)
    }

    fn track(&self, _image: &Image, faces: &[DetectedFace]) -> Result<Vec<DetectedFace>, EngineError> {
        Ok(faces.to_vec())
    }

    fn landmark(&self, image: &Image, _bbox: &FaceBox) -> Result<Landmarks, EngineError> {
        let script = self.lookup(image).map_err(EngineError::Landmark)?;
        Ok(Landmarks {
            points: [(0.0, 0.0); 5],
            score: script.landmark_score,
        })
    }

    fn align(&self, image: &Image, _bbox: &FaceBox, _landmarks: &Landmarks) -> Result<Image, EngineError> {
        Ok(image.clone())
    }

    fn extract_feature(&self, aligned: &Image) -> Result<Embedding, EngineError> {
        Ok(one_hot(aligned.data.first().copied().unwrap_or(0)))
    }

    fn search(&self, probe: &Embedding, threshold: f32) -> Result<Option<MatchResult>, EngineError> {
        let gallery = self.gallery.lock();
        let best = gallery
            .iter()
            .map(|identity| (identity, probe.similarity(&identity.embedding)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best
            .filter(|&(_, similarity)| similarity >= threshold)
            .map(|(identity, similarity)| MatchResult {
                id: identity.id,
                name: identity.name.clone(),
                similarity,
            }))
    }

    fn assess_liveness(&self, image: &Image, _bbox: &FaceBox) -> Result<f32, EngineError> {
        Ok(self.lookup(image).map_err(EngineError::Liveness)?.liveness)
    }

    fn load_gallery(&self, identities: &[Identity]) -> Result<(), EngineError> {
        *self.gallery.lock() = identities.to_vec();
        Ok(())
    }

    fn release_gallery(&self) {
        self.gallery.lock().clear();
    }
}

/// Records every call made on the outbound collaborators.
#[derive(Default)]
pub(crate) struct Recorder {
    cues: Mutex<Vec<AudioCue>>,
    boxes: Mutex<Vec<Option<FaceBox>>>,
    rois: Mutex<Vec<Option<FaceBox>>>,
    infos: Mutex<Vec<(Option<u32>, bool)>>,
    access: Mutex<Vec<AccessRecord>>,
    enrollments: Mutex<Vec<PathBuf>>,
    strangers: Mutex<usize>,
}

impl Recorder {
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            overlay: self.clone(),
            audio: self.clone(),
            exposure: self.clone(),
            audit: self.clone(),
        }
    }

    pub fn cues(&self) -> Vec<AudioCue> {
        self.cues.lock().clone()
    }

    pub fn boxes(&self) -> Vec<Option<FaceBox>> {
        self.boxes.lock().clone()
    }

    pub fn rois(&self) -> Vec<Option<FaceBox>> {
        self.rois.lock().clone()
    }

    pub fn infos(&self) -> Vec<(Option<u32>, bool)> {
        self.infos.lock().clone()
    }

    pub fn access(&self) -> Vec<AccessRecord> {
        self.access.lock().clone()
    }

    pub fn enrollments(&self) -> Vec<PathBuf> {
        self.enrollments.lock().clone()
    }

    pub fn strangers(&self) -> usize {
        *self.strangers.lock()
    }
}

impl Overlay for Recorder {
    fn paint_box(&self, bbox: Option<FaceBox>) {
        self.boxes.lock().push(bbox);
    }

    fn paint_info(&self, info: Option<&UserInfo>, real: bool) {
        self.infos.lock().push((info.map(|i| i.id), real));
    }
}

impl AudioSink for Recorder {
    fn play(&self, cue: AudioCue) {
        self.cues.lock().push(cue);
    }
}

impl ExposureControl for Recorder {
    fn set_region_of_interest(&self, bbox: FaceBox) {
        self.rois.lock().push(Some(bbox));
    }

    fn clear_region_of_interest(&self) {
        self.rois.lock().push(None);
    }
}

impl AuditRecorder for Recorder {
    fn save_enrollment(&self, _image: &Image, path: &Path) -> Result<(), AuditError> {
        self.enrollments.lock().push(path.to_path_buf());
        Ok(())
    }

    fn record_stranger(&self, _image: &Image, _face: &DetectedFace) {
        *self.strangers.lock() += 1;
    }

    fn record_access(&self, _image: &Image, record: &AccessRecord) {
        self.access.lock().push(record.clone());
    }
}

/// Pipeline state without worker threads, with an allow-list directory set.
pub(crate) fn shared_for_test(config: PipelineConfig) -> (PipelineState, Arc<ScriptedEngine>, Arc<Recorder>) {
    shared_with_store(config, Some(PathBuf::from("/data/white_list")))
}

pub(crate) fn shared_with_store(
    config: PipelineConfig,
    allow_list_dir: Option<PathBuf>,
) -> (PipelineState, Arc<ScriptedEngine>, Arc<Recorder>) {
    let engine = Arc::new(ScriptedEngine::new());
    let store = Arc::new(SqliteStore::open_in_memory(allow_list_dir).expect("in-memory store"));
    let recorder = Arc::new(Recorder::default());
    let shared = PipelineState::new(
        config,
        engine.clone(),
        store,
        Arc::new(SoftwareConverter),
        recorder.collaborators(),
    )
    .expect("shared state");
    (shared, engine, recorder)
}
