//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Tracker settings resolved from defaults plus overrides.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// High watermark for tracked-item memory in MiB; `0` disables the
    /// governor sweep.
    pub mem_high_thresh_mib: u64,
    /// Aging worker cadence in seconds.
    pub update_interval_secs: u64,
    /// Whether `enable` spawns the aging worker.
    pub start_worker: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mem_high_thresh_mib: 0,
            update_interval_secs: 150,
            start_worker: true,
        }
    }
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HottrackConfig {
    /// Tracking configuration.
    pub tracking: Option<TrackingSpec>,
}

impl HottrackConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `HOTTRACK_CONFIG` env var (if set),
    /// then apply `HOTTRACK__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("HOTTRACK_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("HOTTRACK__") {
                continue;
            }
            let path = key["HOTTRACK__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["tracking", "mem_high_thresh_mib"] => {
                    self.tracking_mut().mem_high_thresh_mib = Some(parse_value(&key, &value)?);
                }
                ["tracking", "update_interval_secs"] => {
                    self.tracking_mut().update_interval_secs = Some(parse_value(&key, &value)?);
                }
                ["tracking", "start_worker"] => {
                    self.tracking_mut().start_worker = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `TrackerConfig` using defaults plus overrides.
    pub fn to_tracker_config(&self) -> TrackerConfig {
        let mut config = TrackerConfig::default();
        if let Some(tracking) = &self.tracking {
            tracking.apply_to(&mut config);
        }
        config
    }

    fn tracking_mut(&mut self) -> &mut TrackingSpec {
        if self.tracking.is_none() {
            self.tracking = Some(TrackingSpec::default());
        }
        self.tracking.as_mut().expect("tracking config")
    }
}

/// Tracking configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingSpec {
    /// High watermark in MiB.
    pub mem_high_thresh_mib: Option<u64>,
    /// Worker cadence in seconds.
    pub update_interval_secs: Option<u64>,
    /// Whether to spawn the aging worker.
    pub start_worker: Option<bool>,
}

impl TrackingSpec {
    fn apply_to(&self, config: &mut TrackerConfig) {
        if let Some(value) = self.mem_high_thresh_mib {
            config.mem_high_thresh_mib = value;
        }
        if let Some(value) = self.update_interval_secs {
            config.update_interval_secs = value;
        }
        if let Some(value) = self.start_worker {
            config.start_worker = value;
        }
    }
}

/// Runtime-mutable tracker knobs, read at event time so changes take
/// effect without restart.
#[derive(Debug)]
pub(crate) struct Knobs {
    mem_high_thresh_mib: AtomicU64,
    update_interval_secs: AtomicU64,
}

impl Knobs {
    pub(crate) fn from_config(config: &TrackerConfig) -> Self {
        Self {
            mem_high_thresh_mib: AtomicU64::new(config.mem_high_thresh_mib),
            update_interval_secs: AtomicU64::new(config.update_interval_secs),
        }
    }

    pub(crate) fn mem_high_thresh_mib(&self) -> u64 {
        self.mem_high_thresh_mib.load(Ordering::Acquire)
    }

    pub(crate) fn set_mem_high_thresh_mib(&self, mib: u64) {
        self.mem_high_thresh_mib.store(mib, Ordering::Release);
    }

    pub(crate) fn update_interval_secs(&self) -> u64 {
        self.update_interval_secs.load(Ordering::Acquire)
    }

    pub(crate) fn set_update_interval_secs(&self, secs: u64) {
        self.update_interval_secs.store(secs, Ordering::Release);
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
