//! Configuration management for lessonpath

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between periodic video progress flushes while playing
    pub video_flush_interval_secs: u64,

    /// Watched fraction (0-1] at which a video counts as complete
    pub video_completion_threshold: f64,

    /// Reject quiz submissions after the time limit instead of only flagging them
    pub enforce_quiz_time_limit: bool,

    /// Capacity of the progress event channel
    pub event_buffer: usize,

    /// Override for the local store location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video_flush_interval_secs: 5,
            video_completion_threshold: 0.95,
            enforce_quiz_time_limit: false,
            event_buffer: 64,
            store_file: None,
        }
    }
}

impl Config {
    /// Load configuration from disk, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            serde_json::from_str(&contents).with_context(|| "Failed to parse config.json")
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "lessonpath")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.json"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "lessonpath")
            .context("Failed to determine data directory")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Get the local store path
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("store.json")),
        }
    }

    /// Period of the video flush timer, never zero
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.video_flush_interval_secs.max(1))
    }

    /// Completion threshold clamped to (0, 1]
    pub fn completion_threshold(&self) -> f64 {
        if self.video_completion_threshold.is_nan() || self.video_completion_threshold <= 0.0 {
            return Self::default().video_completion_threshold;
        }
        self.video_completion_threshold.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_flushes_every_five_seconds() {
        let config = Config::default();
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
    }

    #[test]
    fn default_config_is_lenient_about_time_limits() {
        let config = Config::default();
        assert!(!config.enforce_quiz_time_limit);
    }

    #[test]
    fn zero_interval_is_raised_to_one_second() {
        let config = Config { video_flush_interval_secs: 0, ..Default::default() };
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
    }

    #[test]
    fn threshold_is_clamped() {
        let config = Config { video_completion_threshold: 1.5, ..Default::default() };
        assert_eq!(config.completion_threshold(), 1.0);
        let config = Config { video_completion_threshold: -1.0, ..Default::default() };
        assert_eq!(config.completion_threshold(), 0.95);
    }

    #[test]
    fn config_deserializes_partial_json() {
        let json = r#"{"video_flush_interval_secs":10,"enforce_quiz_time_limit":true}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.video_flush_interval_secs, 10);
        assert!(config.enforce_quiz_time_limit);
        assert_eq!(config.event_buffer, 64);
    }

    #[test]
    fn store_file_override_wins() {
        let config = Config { store_file: Some("/tmp/x.json".into()), ..Default::default() };
        assert_eq!(config.store_path().unwrap(), PathBuf::from("/tmp/x.json"));
    }
}
