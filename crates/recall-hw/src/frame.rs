//! Raw frame type and image processing — YUYV conversion, dark detection, JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use recall_core::Frame;
use std::time::Instant;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_THRESHOLD: f32 = 0.95;

/// Pixel payload of a dequeued buffer.
#[derive(Clone)]
pub enum PixelData {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv(Vec<u8>),
    /// Motion-JPEG: each buffer is already a complete JPEG image.
    Mjpeg(Vec<u8>),
}

/// A decoded-for-display camera buffer, before encoding for recognition.
#[derive(Clone)]
pub struct RawFrame {
    pub pixels: PixelData,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl RawFrame {
    /// Luma plane (width * height bytes).
    pub fn luma(&self) -> Result<Vec<u8>, FrameError> {
        match &self.pixels {
            PixelData::Yuyv(buf) => yuyv_to_grayscale(buf, self.width, self.height),
            PixelData::Mjpeg(jpeg) => Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?
                .to_luma8()
                .into_raw()),
        }
    }

    /// A frame the camera produced before its exposure settled, or with the
    /// lens covered. Undecodable frames count as dark.
    pub fn is_dark(&self) -> bool {
        match self.luma() {
            Ok(gray) => is_dark_frame(&gray, DARK_THRESHOLD),
            Err(e) => {
                tracing::debug!(seq = self.sequence, error = %e, "undecodable frame");
                true
            }
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let Ok(gray) = self.luma() else {
            return 0.0;
        };
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
    }

    /// Encode as a JPEG [`Frame`]. MJPEG buffers pass through unchanged.
    pub fn encode(&self, quality: u8) -> Result<Frame, FrameError> {
        let data = match &self.pixels {
            PixelData::Mjpeg(jpeg) => jpeg.clone(),
            PixelData::Yuyv(buf) => {
                let rgb = yuyv_to_rgb(buf, self.width, self.height)?;
                encode_jpeg(&rgb, self.width, self.height, quality)?
            }
        };
        Ok(Frame::jpeg(data, self.width, self.height, self.sequence))
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed YUYV (4:2:2) to interleaved RGB8 using BT.601 limited-range coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = y as i32 - 16;
            rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Encode interleaved RGB8 pixels as JPEG.
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        rgb,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
}
