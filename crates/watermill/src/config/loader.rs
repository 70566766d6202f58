use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let nonzero = [
        ("worker_count", config.worker_count as u64),
        ("queue.poll_interval_ms", config.queue.poll_interval_ms),
        ("queue.status_ttl_secs", config.queue.status_ttl_secs),
        ("queue.stale_after_secs", config.queue.stale_after_secs),
        ("reaper.interval_secs", config.reaper.interval_secs),
        ("reaper.retention_secs", config.reaper.retention_secs),
    ];
    for (name, value) in nonzero {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if config.queue.list_key.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "queue.list_key must not be empty".to_string(),
        });
    }

    if config.cache_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "cache_directory must not be empty".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::path::PathBuf;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();

        assert!(config.worker_count >= 1);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert_eq!(config.queue.list_key, "processing_queue");
        assert_eq!(config.queue.status_ttl_secs, 24 * 60 * 60);
        assert_eq!(config.queue.stale_after_secs, 6 * 60 * 60);
        assert_eq!(config.watermark.large_video_threshold_bytes, 500 * 1024 * 1024);
        assert_eq!(config.watermark.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert!(config.cache_directory.ends_with(".watermill/cache"));
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "version": "1.0",
            "database_path": "/var/lib/watermill/watermill.db",
            "cache_directory": "/var/cache/watermill",
            "worker_count": 3,
            "log_format": "json",
            "queue": {"list_key": "wm", "poll_interval_ms": 50, "status_ttl_secs": 60, "stale_after_secs": 900},
            "watermark": {"large_video_threshold_bytes": 1024, "ffmpeg_path": "/opt/ffmpeg"},
            "reaper": {"interval_secs": 30, "retention_secs": 120}
        }"#;
        let config = load_config_from_str(json).unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.cache_directory, PathBuf::from("/var/cache/watermill"));
        assert_eq!(config.queue.list_key, "wm");
        assert_eq!(config.queue.poll_interval().as_millis(), 50);
        assert_eq!(config.queue.stale_after().as_secs(), 900);
        assert_eq!(config.watermark.large_video_threshold_bytes, 1024);
        assert_eq!(config.reaper.retention().as_secs(), 120);
    }

    #[test]
    fn test_unsupported_version() {
        let result = load_config_from_str(r#"{"version": "2.0"}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let result = load_config_from_str(r#"{"version": "1.0", "worker_count": 0}"#);
        match result {
            Err(ConfigError::Validation { message }) => assert!(message.contains("worker_count")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_reaper_interval_rejected() {
        let result =
            load_config_from_str(r#"{"version": "1.0", "reaper": {"interval_secs": 0}}"#);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ nope");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/definitely/not/here/config.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&Config::default()).unwrap();
    }
}
