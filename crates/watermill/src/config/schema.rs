use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub watermark: WatermarkConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database_path: default_database_path(),
            cache_directory: default_cache_directory(),
            worker_count: default_worker_count(),
            log_format: LogFormat::default(),
            queue: QueueConfig::default(),
            watermark: WatermarkConfig::default(),
            reaper: ReaperConfig::default(),
        }
    }
}

fn watermill_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".watermill")
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path()
        .unwrap_or_else(|| watermill_home().join("data").join("watermill.db"))
}

fn default_cache_directory() -> PathBuf {
    watermill_home().join("cache")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_list_key")]
    pub list_key: String,
    /// How often an idle consumer re-checks the shared queue table.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
    /// A queued or processing row untouched for this long is re-queued by
    /// the next request for it.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_list_key() -> String {
    crate::queue::DEFAULT_LIST_KEY.to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_status_ttl_secs() -> u64 {
    crate::queue::DEFAULT_STATUS_TTL.as_secs()
}

fn default_stale_after_secs() -> u64 {
    crate::orchestrator::DEFAULT_STALE_AFTER.as_secs()
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            list_key: default_list_key(),
            poll_interval_ms: default_poll_interval_ms(),
            status_ttl_secs: default_status_ttl_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Videos larger than this use the fast large-file preset.
    #[serde(default = "default_large_video_threshold")]
    pub large_video_threshold_bytes: u64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

fn default_large_video_threshold() -> u64 {
    500 * 1024 * 1024
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            large_video_threshold_bytes: default_large_video_threshold(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Completed results older than this are deleted.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_reaper_interval() -> u64 {
    60 * 60
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval(),
            retention_secs: default_retention(),
        }
    }
}
