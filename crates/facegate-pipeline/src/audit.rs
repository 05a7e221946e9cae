//! File-backed [`AuditRecorder`]: JPEG snapshots in one directory and a
//! JSON-lines log of every stranger sighting and access decision.

use crate::sinks::{AccessRecord, AuditError, AuditRecorder};
use chrono::{DateTime, Utc};
use facegate_core::{DetectedFace, FaceBox, Image, PixelFormat};
use facegate_hw::{FrameConverter, Rotation, SoftwareConverter};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "audit.jsonl";

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AuditLine<'a> {
    Stranger {
        time: DateTime<Utc>,
        snapshot: &'a Path,
        score: f32,
        bbox: FaceBox,
    },
    Access {
        snapshot: &'a Path,
        #[serde(flatten)]
        record: &'a AccessRecord,
    },
}

pub struct FileAuditRecorder {
    dir: PathBuf,
    log: Mutex<()>,
}

impl FileAuditRecorder {
    /// Snapshots and `audit.jsonl` are written under `dir`, created on demand.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            log: Mutex::new(()),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn snapshot_path(&self, time: DateTime<Utc>, mark: char) -> PathBuf {
        self.dir
            .join(format!("{}_{mark}.jpg", time.format("%Y%m%d_%H%M%S%.3f")))
    }

    fn append(&self, line: &AuditLine<'_>) -> Result<(), AuditError> {
        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        let _guard = self.log.lock();
        create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    fn try_record_stranger(&self, image: &Image, face: &DetectedFace) -> Result<PathBuf, AuditError> {
        let time = Utc::now();
        let snapshot = self.snapshot_path(time, 'S');
        write_jpeg(image, &snapshot)?;
        self.append(&AuditLine::Stranger {
            time,
            snapshot: &snapshot,
            score: face.score,
            bbox: face.bbox,
        })?;
        Ok(snapshot)
    }

    fn try_record_access(&self, image: &Image, record: &AccessRecord) -> Result<PathBuf, AuditError> {
        let mark = match record.list {
            facegate_core::ListKind::Allow => 'W',
            facegate_core::ListKind::Deny => 'B',
        };
        let snapshot = self.snapshot_path(record.timestamp, mark);
        write_jpeg(image, &snapshot)?;
        self.append(&AuditLine::Access {
            snapshot: &snapshot,
            record,
        })?;
        Ok(snapshot)
    }
}

impl AuditRecorder for FileAuditRecorder {
    fn save_enrollment(&self, image: &Image, path: &Path) -> Result<(), AuditError> {
        write_jpeg(image, path)
    }

    fn record_stranger(&self, image: &Image, face: &DetectedFace) {
        match self.try_record_stranger(image, face) {
            Ok(path) => tracing::debug!(path = %path.display(), "stranger snapshot saved"),
            Err(e) => tracing::warn!(error = %e, "failed to record stranger"),
        }
    }

    fn record_access(&self, image: &Image, record: &AccessRecord) {
        match self.try_record_access(image, record) {
            Ok(path) => tracing::debug!(id = record.id, path = %path.display(), "access snapshot saved"),
            Err(e) => tracing::warn!(id = record.id, error = %e, "failed to record access"),
        }
    }
}

/// Encode `image` as JPEG at `path`, creating parent directories.
pub fn write_jpeg(image: &Image, path: &Path) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let (w, h) = (image.width, image.height);
    match image.format {
        PixelFormat::Gray8 => {
            let buf = image::GrayImage::from_raw(w, h, image.data.clone())
                .ok_or(AuditError::Unsupported(image.format))?;
            buf.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
        PixelFormat::Rgb888 => {
            let buf = image::RgbImage::from_raw(w, h, image.data.clone())
                .ok_or(AuditError::Unsupported(image.format))?;
            buf.save_with_format(path, image::ImageFormat::Jpeg)?;
        }
        PixelFormat::Yuyv | PixelFormat::Nv12 => {
            let mut rgb = Image::allocate(w, h, PixelFormat::Rgb888);
            SoftwareConverter
                .convert(&image.view(), Rotation::Deg0, &mut rgb)
                .map_err(|_| AuditError::Unsupported(image.format))?;
            return write_jpeg(&rgb, path);
        }
    }
    Ok(())
}
