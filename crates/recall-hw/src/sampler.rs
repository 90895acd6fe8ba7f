//! Frame sampler — owns the capture device and emits frames at a fixed cadence.
//!
//! Capture runs on a dedicated OS thread that dequeues buffers continuously,
//! publishing each one as the live preview (warmup and dark buffers
//! included), and hands one encoded frame per interval to the consumer. Hand-off never blocks: if the consumer has not
//! taken the previous frame yet, the new one is dropped.

use crate::camera::CameraError;
use crate::frame::RawFrame;
use recall_core::{DeviceUnavailable, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// Blocking source of raw camera buffers.
pub trait FrameSource: Send + 'static {
    /// Block until the next buffer is available. [`CameraError::Timeout`] is
    /// not fatal; any other error ends sampling.
    fn next_frame(&mut self) -> Result<RawFrame, CameraError>;
}

/// Something that can be opened into a [`FrameSource`].
pub trait CaptureDevice: Send + Sync + 'static {
    type Source: FrameSource;

    fn open(&self) -> Result<Self::Source, DeviceUnavailable>;

    /// Human-readable identity for logs and status output.
    fn describe(&self) -> String;
}

/// Latest frame seen by the sampler, for live display.
pub type Preview = Option<Arc<RawFrame>>;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between emitted frames.
    pub interval: Duration,
    /// Buffers discarded after opening while auto-exposure settles.
    pub warmup_frames: usize,
    /// JPEG quality for encoded frames (1–100).
    pub jpeg_quality: u8,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            warmup_frames: 4,
            jpeg_quality: 80,
        }
    }
}

struct Running {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct FrameSampler<D: CaptureDevice> {
    device: D,
    config: SamplerConfig,
    preview: Arc<watch::Sender<Preview>>,
    running: Option<Running>,
}

impl<D: CaptureDevice> FrameSampler<D> {
    pub fn new(device: D, config: SamplerConfig) -> Self {
        let (preview, _) = watch::channel(None);
        Self {
            device,
            config,
            preview: Arc::new(preview),
            running: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Live preview, updated on every dequeued buffer while running.
    pub fn preview(&self) -> watch::Receiver<Preview> {
        self.preview.subscribe()
    }

    /// Acquire the device and start sampling into `frames`.
    ///
    /// On failure the sampler stays idle. Starting a running sampler is a no-op.
    pub fn start(&mut self, frames: mpsc::Sender<Frame>) -> Result<(), DeviceUnavailable> {
        if self.running.is_some() {
            return Ok(());
        }

        let source = self.device.open()?;
        tracing::info!(
            device = %self.device.describe(),
            interval_ms = self.config.interval.as_millis() as u64,
            "sampler starting"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let thread = std::thread::Builder::new()
            .name("recall-sampler".into())
            .spawn({
                let stop = stop.clone();
                let config = self.config.clone();
                let preview = self.preview.clone();
                move || run_sampler(source, config, frames, preview, stop)
            })
            .map_err(|e| DeviceUnavailable::Other(format!("failed to spawn sampler thread: {e}")))?;

        self.running = Some(Running { stop, thread });
        Ok(())
    }

    /// Release the device and wait for the capture thread. Safe to call
    /// repeatedly or before `start`.
    ///
    /// Blocks for up to one dequeue timeout; async callers use [`halt`]
    /// instead.
    ///
    /// [`halt`]: FrameSampler::halt
    pub fn stop(&mut self) {
        if let Some(exit) = self.halt() {
            exit.join();
        }
    }

    /// Signal the capture thread to stop without waiting for it. The device
    /// is released once the returned [`SamplerExit`] is joined; join it before
    /// starting again. Returns `None` if the sampler was not running.
    pub fn halt(&mut self) -> Option<SamplerExit> {
        let running = self.running.take()?;
        running.stop.store(true, Ordering::Release);
        self.preview.send_replace(None);
        tracing::info!(device = %self.device.describe(), "sampler stopping");
        Some(SamplerExit {
            thread: running.thread,
        })
    }
}

/// A capture thread that has been told to stop.
#[must_use = "join the exit to release the device"]
pub struct SamplerExit {
    thread: JoinHandle<()>,
}

impl SamplerExit {
    /// Block until the capture thread has exited and released the device.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!("sampler thread panicked");
        }
        tracing::debug!("sampler thread exited");
    }
}

impl<D: CaptureDevice> Drop for FrameSampler<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sampler<S: FrameSource>(
    mut source: S,
    config: SamplerConfig,
    frames: mpsc::Sender<Frame>,
    preview: Arc<watch::Sender<Preview>>,
    stop: Arc<AtomicBool>,
) {
    let mut warmup_left = config.warmup_frames;
    let mut ready = false;
    let mut last_emit: Option<Instant> = None;

    while !stop.load(Ordering::Acquire) {
        let raw = match source.next_frame() {
            Ok(raw) => raw,
            Err(CameraError::Timeout) => continue,
            Err(e) => {
                tracing::error!(error = %e, "capture failed; sampler exiting");
                break;
            }
        };

        if stop.load(Ordering::Acquire) {
            break;
        }
        let raw = Arc::new(raw);
        preview.send_replace(Some(raw.clone()));

        if !ready {
            if warmup_left > 0 {
                warmup_left -= 1;
                tracing::debug!(seq = raw.sequence, "discarding warmup frame");
                continue;
            }
            if raw.is_dark() {
                tracing::debug!(seq = raw.sequence, "skipping dark frame");
                continue;
            }
            ready = true;
            tracing::info!(seq = raw.sequence, "camera ready");
        }

        if last_emit.is_some_and(|at| at.elapsed() < config.interval) {
            continue;
        }
        last_emit = Some(Instant::now());

        let frame = match raw.encode(config.jpeg_quality) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(seq = raw.sequence, error = %e, "frame encode failed");
                continue;
            }
        };

        match frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                tracing::debug!(seq = frame.sequence, "frame dropped: consumer busy");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("frame consumer gone; sampler exiting");
                break;
            }
        }
    }
    preview.send_replace(None);
}
