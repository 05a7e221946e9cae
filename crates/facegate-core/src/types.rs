use serde::{Deserialize, Serialize};

/// Pixel layout of an [`Image`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    #[default]
    Rgb888,
    /// 8-bit grayscale, 1 byte per pixel (IR sensors).
    Gray8,
    /// YUYV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
    /// NV12 (YCbCr 4:2:0 semi-planar): Y plane followed by interleaved UV.
    Nv12,
}

impl PixelFormat {
    /// Number of bytes needed to hold a `width` x `height` frame.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb888 => pixels * 3,
            PixelFormat::Gray8 => pixels,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::Nv12 => pixels + pixels / 2,
        }
    }
}

/// An owned image: descriptor plus pixel storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Image {
    /// Allocate a zeroed image of the given geometry.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0u8; format.frame_len(width, height)],
        }
    }

    /// Borrow this image as a read-only view.
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            format: self.format,
            data: &self.data,
        }
    }

    /// Reshape the descriptor, growing or shrinking storage only when the
    /// byte length changes.
    pub fn reshape(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.data.resize(format.frame_len(width, height), 0);
    }
}

/// A borrowed frame, as handed over by a camera callback.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

/// Integer face rectangle in pixel coordinates (right/bottom exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// True when the box lies fully inside a `width` x `height` frame.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.left >= 0
            && self.top >= 0
            && self.right <= width as i32
            && self.bottom <= height as i32
    }

    /// Map a box from detection resolution to native capture resolution.
    pub fn scaled(&self, ratio: f32) -> Self {
        let s = |v: i32| (v as f32 * ratio).round() as i32;
        Self {
            left: s(self.left),
            top: s(self.top),
            right: s(self.right),
            bottom: s(self.bottom),
        }
    }
}

/// A face located by the detector, with the id assigned by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    /// Detection confidence in [0, 1].
    pub score: f32,
    /// Tracker id; stable for the same face across consecutive frames.
    pub track_id: i32,
}

impl DetectedFace {
    /// Same face with its box mapped by `ratio`.
    pub fn scaled(&self, ratio: f32) -> Self {
        Self {
            bbox: self.bbox.scaled(ratio),
            ..*self
        }
    }
}

/// Five-point facial landmarks with the landmarker's quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub points: [(f32, f32); 5],
    pub score: f32,
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]; 0 when either vector is all zeros.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (dot, sq_a, sq_b) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (a, b)| {
                (dot + a * b, sq_a + a * a, sq_b + b * b)
            });
        let norm = (sq_a * sq_b).sqrt();
        if norm > 0.0 {
            dot / norm
        } else {
            0.0
        }
    }

    /// Little-endian f32 bytes, as persisted by the identity store.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// byte length is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

/// An enrolled identity as held in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u32,
    /// Display name; by convention the path of the enrollment picture.
    pub name: String,
    pub embedding: Embedding,
}

/// Best gallery hit for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub id: u32,
    pub name: String,
    pub similarity: f32,
}

/// Which access list an identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Allow,
    Deny,
}

impl ListKind {
    /// Identities whose stored name contains `deny_marker` are deny-listed.
    pub fn classify(name: &str, deny_marker: &str) -> Self {
        if !deny_marker.is_empty() && name.contains(deny_marker) {
            ListKind::Deny
        } else {
            ListKind::Allow
        }
    }
}
