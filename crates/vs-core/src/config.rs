//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML (or JSON, for
//! files ending in `.json`) and carries the server, streaming, tools, and
//! storage sections. Every section defaults sensibly so an empty file is
//! valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Parse the contents of `path`: JSON when it ends in `.json`, TOML
    /// otherwise.
    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(contents)
        } else {
            Self::from_toml(contents)
        }
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        let s = &self.streaming;
        if s.segment_duration_ms == 0 {
            warnings.push("streaming.segment_duration_ms is 0; segments cannot be computed".into());
        }
        if s.transmux_min_segment_ms == 0 {
            warnings.push(
                "streaming.transmux_min_segment_ms is 0; segment_duration_ms is used instead".into(),
            );
        }
        if s.poll_interval_ms == 0 {
            warnings.push("streaming.poll_interval_ms is 0; segment waits will spin".into());
        }
        if s.poll_interval_ms >= s.segment_timeout_secs.saturating_mul(1000) {
            warnings.push(format!(
                "streaming.poll_interval_ms ({}) is not shorter than segment_timeout_secs ({}s)",
                s.poll_interval_ms, s.segment_timeout_secs
            ));
        }
        if s.lookahead_segments == 0 {
            warnings.push(
                "streaming.lookahead_segments is 0; every request past a session's start will restart it"
                    .into(),
            );
        }

        if let Some(ref cfg) = self.storage.rclone_config {
            if !cfg.exists() {
                warnings.push(format!(
                    "storage.rclone_config '{}' does not exist",
                    cfg.display()
                ));
            }
        }

        let valid_backends = ["local", "rclone"];
        if !valid_backends.contains(&self.storage.default_backend.as_str()) {
            warnings.push(format!(
                "storage.default_backend '{}' is not a recognized backend (valid: {})",
                self.storage.default_backend,
                valid_backends.join(", ")
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL external processes use to read remote sources back through
    /// this server. Defaults to `http://127.0.0.1:{port}`.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// The base URL for loopback requests, without a trailing slash.
    pub fn loopback_url(&self) -> String {
        match self.public_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => format!("http://127.0.0.1:{}", self.port),
        }
    }
}

/// Session orchestration and segment timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Root directory under which each session gets its own output directory.
    pub scratch_dir: PathBuf,
    /// Target duration of a transcoded segment.
    pub segment_duration_ms: u64,
    /// Minimum distance between keyframe-aligned segment starts when
    /// transmuxing.
    pub transmux_min_segment_ms: u64,
    /// How often a waiting request re-lists a session's output directory.
    pub poll_interval_ms: u64,
    /// Upper bound on how long a request waits for one segment.
    pub segment_timeout_secs: u64,
    /// Pause after spawning a process before the first poll.
    pub startup_grace_ms: u64,
    /// How far past the furthest served segment a session is still expected
    /// to reach soon enough to be reused.
    pub lookahead_segments: u32,
    /// Sessions not served for this long are destroyed.
    pub idle_timeout_secs: u64,
    /// How often idle sessions are reaped and runaway sessions throttled.
    pub reap_interval_secs: u64,
    /// A session that has written this many segments past the furthest one
    /// served is paused until it is requested again. 0 disables throttling.
    pub throttle_buffer_segments: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("vodserve"),
            segment_duration_ms: 5000,
            transmux_min_segment_ms: 5000,
            poll_interval_ms: 500,
            segment_timeout_secs: 20,
            startup_grace_ms: 200,
            lookahead_segments: 5,
            idle_timeout_secs: 20 * 60,
            reap_interval_secs: 5,
            throttle_buffer_segments: 10,
        }
    }
}

impl StreamingConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_millis(self.segment_duration_ms)
    }

    /// Falls back to the transcode segment length when unset, since a zero
    /// minimum would cut a segment at every keyframe.
    pub fn transmux_min_segment(&self) -> Duration {
        match self.transmux_min_segment_ms {
            0 => self.segment_duration(),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub rclone_path: Option<PathBuf>,
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Optional rclone config file passed as `--config`.
    pub rclone_config: Option<PathBuf>,
    /// Backend assumed for locators without a recognized tag.
    pub default_backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rclone_config: None,
            default_backend: "local".into(),
        }
    }
}
