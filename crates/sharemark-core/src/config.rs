//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! topic = "annotations"
//! hit_threshold = 0.02
//!
//! [sync]
//! jitter_max_ms = 50
//! initial_timeout_ms = 500
//! backoff_multiplier = 2
//! max_retries = 3
//!
//! [overlay]
//! push_delays_ms = [0, 100, 300]
//! ```

use crate::geometry::DEFAULT_HIT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default data-channel topic for annotation traffic.
pub const DEFAULT_TOPIC: &str = "annotations";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Late-joiner sync timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound of the random delay before answering a state request.
    pub jitter_max_ms: u64,
    /// Wait before the first retry of a state request.
    pub initial_timeout_ms: u64,
    pub backoff_multiplier: u32,
    /// Re-broadcasts after the initial request before giving up.
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            jitter_max_ms: 50,
            initial_timeout_ms: 500,
            backoff_multiplier: 2,
            max_retries: 3,
        }
    }
}

impl SyncConfig {
    /// Timeout after the request sent at `attempt` (0 = initial request).
    pub fn retry_timeout(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt);
        Duration::from_millis(self.initial_timeout_ms.saturating_mul(factor))
    }
}

/// Overlay mirror timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Delays after activation at which the full state is pushed.
    pub push_delays_ms: Vec<u64>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            push_delays_ms: vec![0, 100, 300],
        }
    }
}

impl OverlayConfig {
    pub fn push_delays(&self) -> Vec<Duration> {
        self.push_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub topic: String,
    /// Eraser tolerance in normalized units.
    pub hit_threshold: f64,
    pub sync: SyncConfig,
    pub overlay: OverlayConfig,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            hit_threshold: DEFAULT_HIT_THRESHOLD,
            sync: SyncConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl AnnotationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like [`AnnotationConfig::load`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
