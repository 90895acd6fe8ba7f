//! recall-hw — Hardware abstraction for camera capture and frame sampling.
//!
//! Provides V4L2-based camera access, frame conversion and JPEG encoding,
//! and the sampler thread that feeds frames to the recognition coordinator.

pub mod camera;
pub mod frame;
pub mod sampler;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4lDevice};
pub use frame::RawFrame;
pub use sampler::{CaptureDevice, FrameSampler, FrameSource, Preview, SamplerConfig, SamplerExit};
