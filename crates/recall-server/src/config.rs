use std::path::PathBuf;
use std::time::Duration;

/// Server configuration, loaded from environment variables.
pub struct Config {
    /// Listen address (default: 127.0.0.1:8787).
    pub bind: String,
    /// Path to the SQLite people store.
    pub db_path: PathBuf,
    /// Upstream face matcher that receives forwarded images. Without one,
    /// every recognition answers "no face detected".
    pub matcher_url: Option<String>,
    /// OpenAI-compatible chat completions endpoint for summaries.
    pub llm_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    /// Timeout for matcher and language model requests.
    pub upstream_timeout: Duration,
}

impl Config {
    /// Load configuration from `RECALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("recall");

        let db_path = std::env::var("RECALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("people.db"));

        Self {
            bind: std::env::var("RECALL_BIND").unwrap_or_else(|_| "127.0.0.1:8787".to_string()),
            db_path,
            matcher_url: env_opt("RECALL_MATCHER_URL"),
            llm_url: env_opt("RECALL_LLM_URL"),
            llm_api_key: env_opt("RECALL_LLM_API_KEY"),
            llm_model: env_opt("RECALL_LLM_MODEL")
                .unwrap_or_else(|| "google/gemini-2.5-flash".to_string()),
            upstream_timeout: Duration::from_secs(env_u64("RECALL_UPSTREAM_TIMEOUT_SECS", 20)),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
