//! Frame conversion: rotation, nearest-neighbour scaling and pixel format
//! conversion from camera layouts (YUYV, NV12, GREY, RGB) into analysis
//! buffers.

use facegate_core::{Image, ImageView, PixelFormat};

/// Clockwise rotation applied while converting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self, FrameError> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(FrameError::UnsupportedRotation(other)),
        }
    }

    /// True when the rotation swaps width and height.
    pub fn is_transposing(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Geometry of a `width` x `height` frame after rotation.
    pub fn rotated_dims(self, width: u32, height: u32) -> (u32, u32) {
        if self.is_transposing() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Map a pixel of the rotated frame back to source coordinates.
    fn source_xy(self, x: u32, y: u32, src_w: u32, src_h: u32) -> (u32, u32) {
        match self {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (y, src_h - 1 - x),
            Rotation::Deg180 => (src_w - 1 - x, src_h - 1 - y),
            Rotation::Deg270 => (src_w - 1 - y, x),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(u32),
    #[error("cannot convert into {0:?}")]
    UnsupportedTarget(PixelFormat),
    #[error("empty frame geometry {width}x{height}")]
    EmptyGeometry { width: u32, height: u32 },
    #[error("{format:?} frame needs even dimensions, got {width}x{height}")]
    OddGeometry {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
}

/// Converts a camera frame into a destination buffer.
///
/// The destination keeps its own geometry and pixel format; the source is
/// rotated first and then scaled to fit it.
pub trait FrameConverter: Send + Sync {
    fn convert(&self, src: &ImageView<'_>, rotation: Rotation, dst: &mut Image) -> Result<(), FrameError>;
}

/// CPU implementation of [`FrameConverter`]. Supports RGB888 and GRAY8
/// targets from every [`PixelFormat`], plus same-format rotation for any
/// unscaled conversion.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareConverter;

impl FrameConverter for SoftwareConverter {
    fn convert(&self, src: &ImageView<'_>, rotation: Rotation, dst: &mut Image) -> Result<(), FrameError> {
        validate(src)?;
        if dst.width == 0 || dst.height == 0 {
            return Err(FrameError::EmptyGeometry {
                width: dst.width,
                height: dst.height,
            });
        }
        let expected = dst.format.frame_len(dst.width, dst.height);
        dst.data.resize(expected, 0);

        let (rot_w, rot_h) = rotation.rotated_dims(src.width, src.height);

        if dst.format == src.format && (rot_w, rot_h) == (dst.width, dst.height) {
            if matches!(src.format, PixelFormat::Rgb888 | PixelFormat::Gray8) {
                rotate_packed(src, rotation, dst);
                return Ok(());
            }
            if rotation == Rotation::Deg0 {
                dst.data.copy_from_slice(&src.data[..expected]);
                return Ok(());
            }
        }

        let bpp = match dst.format {
            PixelFormat::Rgb888 => 3,
            PixelFormat::Gray8 => 1,
            other => return Err(FrameError::UnsupportedTarget(other)),
        };

        let dst_w = dst.width as usize;
        for dy in 0..dst.height {
            let ry = (dy as u64 * rot_h as u64 / dst.height as u64) as u32;
            for dx in 0..dst.width {
                let rx = (dx as u64 * rot_w as u64 / dst.width as u64) as u32;
                let (sx, sy) = rotation.source_xy(rx, ry, src.width, src.height);
                let off = (dy as usize * dst_w + dx as usize) * bpp;
                if bpp == 3 {
                    let (r, g, b) = sample_rgb(src, sx, sy);
                    dst.data[off] = r;
                    dst.data[off + 1] = g;
                    dst.data[off + 2] = b;
                } else {
                    dst.data[off] = sample_luma(src, sx, sy);
                }
            }
        }
        Ok(())
    }
}

fn validate(src: &ImageView<'_>) -> Result<(), FrameError> {
    if src.width == 0 || src.height == 0 {
        return Err(FrameError::EmptyGeometry {
            width: src.width,
            height: src.height,
        });
    }
    // chroma is shared by 2 pixels (YUYV) or 2x2 pixels (NV12)
    let odd = match src.format {
        PixelFormat::Yuyv => src.width % 2 != 0,
        PixelFormat::Nv12 => src.width % 2 != 0 || src.height % 2 != 0,
        PixelFormat::Rgb888 | PixelFormat::Gray8 => false,
    };
    if odd {
        return Err(FrameError::OddGeometry {
            format: src.format,
            width: src.width,
            height: src.height,
        });
    }
    let expected = src.format.frame_len(src.width, src.height);
    if src.data.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: src.data.len(),
        });
    }
    Ok(())
}

/// Same-format rotation for byte-packed layouts.
fn rotate_packed(src: &ImageView<'_>, rotation: Rotation, dst: &mut Image) {
    let bpp = if src.format == PixelFormat::Rgb888 { 3 } else { 1 };
    let src_w = src.width as usize;
    let dst_w = dst.width as usize;
    for y in 0..dst.height {
        for x in 0..dst.width {
            let (sx, sy) = rotation.source_xy(x, y, src.width, src.height);
            let s = (sy as usize * src_w + sx as usize) * bpp;
            let d = (y as usize * dst_w + x as usize) * bpp;
            dst.data[d..d + bpp].copy_from_slice(&src.data[s..s + bpp]);
        }
    }
}

/// Y, U, V components of the source pixel at (x, y).
fn sample_yuv(src: &ImageView<'_>, x: u32, y: u32) -> (u8, u8, u8) {
    let w = src.width as usize;
    let (x, y) = (x as usize, y as usize);
    match src.format {
        PixelFormat::Yuyv => {
            // [Y0, U, Y1, V] per pixel pair
            let pair = (y * w + (x & !1)) * 2;
            let luma = src.data[(y * w + x) * 2];
            (luma, src.data[pair + 1], src.data[pair + 3])
        }
        PixelFormat::Nv12 => {
            let luma = src.data[y * w + x];
            let uv = w * src.height as usize + (y / 2) * w + (x & !1);
            (luma, src.data[uv], src.data[uv + 1])
        }
        PixelFormat::Gray8 => (src.data[y * w + x], 128, 128),
        PixelFormat::Rgb888 => {
            let (r, g, b) = sample_rgb(src, x as u32, y as u32);
            (rgb_to_luma(r, g, b), 128, 128)
        }
    }
}

fn sample_rgb(src: &ImageView<'_>, x: u32, y: u32) -> (u8, u8, u8) {
    if src.format == PixelFormat::Rgb888 {
        let off = (y as usize * src.width as usize + x as usize) * 3;
        return (src.data[off], src.data[off + 1], src.data[off + 2]);
    }
    let (luma, u, v) = sample_yuv(src, x, y);
    yuv_to_rgb(luma, u, v)
}

fn sample_luma(src: &ImageView<'_>, x: u32, y: u32) -> u8 {
    sample_yuv(src, x, y).0
}

/// BT.601 full-range YUV → RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    (
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    )
}

pub fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}
