use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate something else.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Base URL of the recognize/summary endpoints.
    pub api_url: String,
    /// Sent as both `Authorization: Bearer` and `apikey` when set.
    pub api_key: Option<String>,
    /// Time between frames submitted for recognition.
    pub sample_interval: Duration,
    /// Suppression window after a dismissal.
    pub cooldown: Duration,
    /// Upper bound on each recognize/summary request.
    pub request_timeout: Duration,
    /// Number of warmup frames to discard after opening the camera.
    pub warmup_frames: usize,
    /// JPEG quality for submitted frames (1–100).
    pub jpeg_quality: u8,
    /// Start a session as soon as the daemon is up.
    pub autostart: bool,
}

impl Config {
    /// Load configuration from `RECALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            camera_device: std::env::var("RECALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("RECALL_CAPTURE_WIDTH", 1280),
            capture_height: env_u32("RECALL_CAPTURE_HEIGHT", 720),
            api_url: std::env::var("RECALL_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8787".to_string()),
            api_key: std::env::var("RECALL_API_KEY").ok().filter(|k| !k.is_empty()),
            sample_interval: Duration::from_millis(env_u64("RECALL_SAMPLE_INTERVAL_MS", 2000)),
            cooldown: Duration::from_millis(env_u64("RECALL_COOLDOWN_MS", 5000)),
            request_timeout: Duration::from_secs(env_u64("RECALL_REQUEST_TIMEOUT_SECS", 10)),
            warmup_frames: env_usize("RECALL_WARMUP_FRAMES", 4),
            jpeg_quality: env_u64("RECALL_JPEG_QUALITY", 80).clamp(1, 100) as u8,
            autostart: std::env::var("RECALL_AUTOSTART")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
