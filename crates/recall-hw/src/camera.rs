//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{PixelData, RawFrame};
use crate::sampler::{CaptureDevice, FrameSource};
use recall_core::DeviceUnavailable;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// How long a single dequeue may block before the sampler rechecks its stop flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("timed out waiting for a buffer")]
    Timeout,
}

impl From<CameraError> for DeviceUnavailable {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::DeviceNotFound(_) => DeviceUnavailable::NotFound,
            CameraError::PermissionDenied(_) => DeviceUnavailable::PermissionDenied,
            other => DeviceUnavailable::Other(other.to_string()),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG, passed straight through to recognition.
    Mjpeg,
    /// YUYV 4:2:2 packed, converted and encoded per sample.
    Yuyv,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate
    /// a capture format close to `width`x`height`, preferring MJPEG.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            io::ErrorKind::NotFound => CameraError::DeviceNotFound(device_path.to_string()),
            _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
            _ => CameraError::CaptureFailed(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (fourcc, pixel_format, width, height) =
            negotiate(&device, width, height, FourCC::new(b"MJPG"))
                .or_else(|_| negotiate(&device, width, height, FourCC::new(b"YUYV")))?;

        tracing::info!(width, height, fourcc = ?fourcc, "negotiated format");

        Ok(Self {
            device,
            width,
            height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start a memory-mapped capture stream.
    pub fn stream(&self) -> Result<MmapStream<'static>, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        Ok(stream)
    }

    /// Wrap a dequeued buffer according to the negotiated format.
    fn wrap(&self, buf: &[u8], bytes_used: usize, sequence: u32) -> Result<RawFrame, CameraError> {
        let pixels = match self.pixel_format {
            PixelFormat::Mjpeg => {
                let used = if bytes_used == 0 { buf.len() } else { bytes_used.min(buf.len()) };
                PixelData::Mjpeg(buf[..used].to_vec())
            }
            PixelFormat::Yuyv => {
                let expected = (self.width * self.height * 2) as usize;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "YUYV buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                PixelData::Yuyv(buf[..expected].to_vec())
            }
        };
        Ok(RawFrame {
            pixels,
            width: self.width,
            height: self.height,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
    want: FourCC,
) -> Result<(FourCC, PixelFormat, u32, u32), CameraError> {
    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
    })?;
    fmt.fourcc = want;
    fmt.width = width;
    fmt.height = height;

    let negotiated = device.set_format(&fmt).map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
    })?;

    let fourcc = negotiated.fourcc;
    let pixel_format = if fourcc == FourCC::new(b"MJPG") {
        PixelFormat::Mjpeg
    } else if fourcc == FourCC::new(b"YUYV") {
        PixelFormat::Yuyv
    } else {
        return Err(CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {fourcc:?} (need MJPG or YUYV)"
        )));
    };
    Ok((fourcc, pixel_format, negotiated.width, negotiated.height))
}

/// A V4L2 camera opened for continuous capture.
pub struct CameraSource {
    camera: Camera,
    stream: MmapStream<'static>,
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<RawFrame, CameraError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                CameraError::Timeout
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;
        self.camera.wrap(buf, meta.bytesused as usize, meta.sequence)
    }
}

/// Capture device addressed by its `/dev/videoN` path.
#[derive(Debug, Clone)]
pub struct V4lDevice {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

impl V4lDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            width: 1280,
            height: 720,
        }
    }
}

impl CaptureDevice for V4lDevice {
    type Source = CameraSource;

    fn open(&self) -> Result<CameraSource, DeviceUnavailable> {
        let camera = Camera::open(&self.path, self.width, self.height)?;
        let stream = camera.stream()?;
        Ok(CameraSource { camera, stream })
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_maps_to_not_found() {
        let err = Camera::open("/dev/video-does-not-exist", 640, 480)
            .err()
            .expect("open should fail");
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert_eq!(DeviceUnavailable::from(err), DeviceUnavailable::NotFound);
    }

    #[test]
    fn test_permission_error_maps_to_permission_denied() {
        let err = CameraError::PermissionDenied("/dev/video0".into());
        assert_eq!(DeviceUnavailable::from(err), DeviceUnavailable::PermissionDenied);
    }

    #[test]
    fn test_other_errors_keep_detail() {
        match DeviceUnavailable::from(CameraError::DeviceBusy) {
            DeviceUnavailable::Other(detail) => assert_eq!(detail, "device busy"),
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
