use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Pipeline configuration. Every field has a default; a TOML document only
/// needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Native capture resolution of the feature and IR paths.
    pub native_width: u32,
    pub native_height: u32,
    /// Resolution detection runs at.
    pub detect_width: u32,
    pub detect_height: u32,
    /// Number of detection buffers.
    pub pool_capacity: usize,
    /// Maximum number of enrolled identities loaded into the gallery.
    pub gallery_capacity: usize,
    /// Minimum detection score for visible-light faces.
    pub rgb_score_threshold: f32,
    /// Minimum detection score for IR faces during a liveness check.
    pub ir_score_threshold: f32,
    /// Minimum landmark score for live frames.
    pub landmark_score_running: f32,
    /// Minimum landmark score when enrolling from a still image.
    pub landmark_score_image: f32,
    /// Minimum similarity passed to the engine's gallery search.
    pub similarity_threshold: f32,
    /// Minimum detection score for a live enrollment.
    pub register_score_threshold: f32,
    /// Gallery hits tolerated during registration before it is closed as
    /// "already registered".
    pub register_repeat_limit: u32,
    /// Minimum liveness real-score.
    pub real_score_threshold: f32,
    /// Faces narrower than `frame_width / min_face_width_divisor` are rejected.
    pub min_face_width_divisor: u32,
    /// The tracked face id is forgotten after this long.
    pub retrack_interval_ms: u64,
    /// Bounded wait of the feature worker; also the session tick period.
    pub feature_wait_ms: u64,
    /// Ticks a registration or deletion session may stay open.
    pub session_tick_limit: u32,
    /// Minimum spacing between stranger snapshots.
    pub stranger_snapshot_interval_secs: u64,
    /// Identities whose name contains this marker are deny-listed.
    pub deny_list_marker: String,
    /// File name prefix of live enrollment pictures.
    pub enrollment_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            native_width: 720,
            native_height: 1280,
            detect_width: 360,
            detect_height: 640,
            pool_capacity: 2,
            gallery_capacity: 1000,
            rgb_score_threshold: 0.55,
            ir_score_threshold: 0.7,
            landmark_score_running: 0.9,
            landmark_score_image: 0.5,
            similarity_threshold: 0.5,
            register_score_threshold: 0.99,
            register_repeat_limit: 5,
            real_score_threshold: 0.7,
            min_face_width_divisor: 5,
            retrack_interval_ms: 1000,
            feature_wait_ms: 100,
            session_tick_limit: 100,
            stranger_snapshot_interval_secs: 3,
            deny_list_marker: "black_list".to_string(),
            enrollment_prefix: "user".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            native_width: env_parse("FACEGATE_NATIVE_WIDTH", d.native_width),
            native_height: env_parse("FACEGATE_NATIVE_HEIGHT", d.native_height),
            detect_width: env_parse("FACEGATE_DETECT_WIDTH", d.detect_width),
            detect_height: env_parse("FACEGATE_DETECT_HEIGHT", d.detect_height),
            pool_capacity: env_parse("FACEGATE_POOL_CAPACITY", d.pool_capacity),
            gallery_capacity: env_parse("FACEGATE_GALLERY_CAPACITY", d.gallery_capacity),
            rgb_score_threshold: env_parse("FACEGATE_RGB_SCORE", d.rgb_score_threshold),
            ir_score_threshold: env_parse("FACEGATE_IR_SCORE", d.ir_score_threshold),
            landmark_score_running: env_parse("FACEGATE_LANDMARK_SCORE", d.landmark_score_running),
            landmark_score_image: env_parse("FACEGATE_LANDMARK_SCORE_IMAGE", d.landmark_score_image),
            similarity_threshold: env_parse("FACEGATE_SIMILARITY_THRESHOLD", d.similarity_threshold),
            register_score_threshold: env_parse("FACEGATE_REGISTER_SCORE", d.register_score_threshold),
            register_repeat_limit: env_parse("FACEGATE_REGISTER_REPEAT_LIMIT", d.register_repeat_limit),
            real_score_threshold: env_parse("FACEGATE_REAL_SCORE", d.real_score_threshold),
            min_face_width_divisor: env_parse("FACEGATE_MIN_FACE_WIDTH_DIVISOR", d.min_face_width_divisor),
            retrack_interval_ms: env_parse("FACEGATE_RETRACK_INTERVAL_MS", d.retrack_interval_ms),
            feature_wait_ms: env_parse("FACEGATE_FEATURE_WAIT_MS", d.feature_wait_ms),
            session_tick_limit: env_parse("FACEGATE_SESSION_TICK_LIMIT", d.session_tick_limit),
            stranger_snapshot_interval_secs: env_parse(
                "FACEGATE_STRANGER_SNAPSHOT_SECS",
                d.stranger_snapshot_interval_secs,
            ),
            deny_list_marker: std::env::var("FACEGATE_DENY_LIST_MARKER").unwrap_or(d.deny_list_marker),
            enrollment_prefix: std::env::var("FACEGATE_ENROLLMENT_PREFIX").unwrap_or(d.enrollment_prefix),
        }
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.native_width == 0 || self.native_height == 0 {
            return Err(ConfigError::Invalid("native resolution must be non-zero".into()));
        }
        if self.detect_width == 0 || self.detect_height == 0 {
            return Err(ConfigError::Invalid("detection resolution must be non-zero".into()));
        }
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid("pool_capacity must be at least 1".into()));
        }
        if self.gallery_capacity == 0 {
            return Err(ConfigError::Invalid("gallery_capacity must be at least 1".into()));
        }
        if self.min_face_width_divisor == 0 {
            return Err(ConfigError::Invalid("min_face_width_divisor must be non-zero".into()));
        }
        if self.feature_wait_ms == 0 {
            return Err(ConfigError::Invalid("feature_wait_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Factor mapping detection coordinates to native coordinates.
    pub fn scale_ratio(&self) -> f32 {
        let native = self.native_width.min(self.native_height) as f32;
        let detect = self.detect_width.min(self.detect_height) as f32;
        native / detect
    }

    pub fn feature_wait(&self) -> Duration {
        Duration::from_millis(self.feature_wait_ms)
    }

    pub fn retrack_interval(&self) -> Duration {
        Duration::from_millis(self.retrack_interval_ms)
    }

    pub fn stranger_snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.stranger_snapshot_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
