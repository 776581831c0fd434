use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            plugins: PluginsConfig::default(),
            audio: AudioConfig::default(),
            aggregator: AggregatorConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: true,
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where plugins are discovered and what happens when they are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Searched in addition to the data directory's `plugins/`.
    #[serde(default)]
    pub extra_dirs: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub bind_on_discovery: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            extra_dirs: Vec::new(),
            bind_on_discovery: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
    /// Upper bound for the byte length of one DATA frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_pool_buffers")]
    pub pool_buffers: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            max_frame_bytes: default_max_frame_bytes(),
            pool_buffers: default_pool_buffers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: usize,
    #[serde(default)]
    pub start_offline: bool,
}

impl AggregatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            sync_page_size: default_sync_page_size(),
            start_offline: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_idle_grace_ms")]
    pub idle_grace_ms: u64,
    #[serde(default = "default_engine_connect_timeout_ms")]
    pub engine_connect_timeout_ms: u64,
}

impl PlaybackConfig {
    pub fn idle_grace(&self) -> Duration {
        Duration::from_millis(self.idle_grace_ms)
    }

    pub fn engine_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_connect_timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            idle_grace_ms: default_idle_grace_ms(),
            engine_connect_timeout_ms: default_engine_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        let positive = [
            ("audio.max_frame_bytes", self.audio.max_frame_bytes),
            ("audio.pool_buffers", self.audio.pool_buffers),
            ("aggregator.sync_page_size", self.aggregator.sync_page_size),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ValidationError::Zero { field });
            }
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_true() -> bool {
    true
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

fn default_pool_buffers() -> usize {
    3
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_sync_page_size() -> usize {
    100
}

fn default_idle_grace_ms() -> u64 {
    1000
}

fn default_engine_connect_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.stdout);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.aggregator.debounce(), Duration::from_millis(200));
        assert_eq!(config.audio.max_frame_bytes, 1 << 20);
        assert_eq!(config.playback.idle_grace(), Duration::from_secs(1));
        assert_eq!(
            config.playback.engine_connect_timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            config_version = 1

            [aggregator]
            sync_page_size = 25

            [plugins]
            extra_dirs = ["/opt/cadenza/plugins"]
            "#,
        )
        .unwrap();
        assert_eq!(config.aggregator.sync_page_size, 25);
        assert_eq!(config.aggregator.debounce_ms, 200);
        assert_eq!(config.plugins.extra_dirs.len(), 1);
        assert!(config.plugins.bind_on_discovery);
    }

    #[test]
    fn zero_page_size_rejected() {
        let err = Config::from_toml_str("[aggregator]\nsync_page_size = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation(ValidationError::Zero {
                field: "aggregator.sync_page_size"
            })
        ));
    }

    #[test]
    fn load_reports_parse_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::rooted_at(tmp.path());
        dirs.ensure_exists().unwrap();
        fs::write(Config::config_path(&dirs), "config_version = \"one\"").unwrap();
        match Config::load_or_default(&dirs) {
            Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with("config.toml")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
