use std::path::Path;
use std::time::Duration;

use interest_grid::{GridConfig, GridError};
use serde::{Deserialize, Serialize};

/// Errors from loading or validating engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("invalid engine config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine-wide tuning knobs. Every field has a default, so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid: GridConfig,
    /// A jump farther than this (world units) forces a full zone-in.
    pub zone_in_distance: f32,
    /// Period of the background awareness sweep.
    pub sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            zone_in_distance: 1024.0,
            sweep_interval_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if !(self.zone_in_distance.is_finite() && self.zone_in_distance > 0.0) {
            return Err(ConfigError::Invalid {
                field: "zone_in_distance",
                reason: format!("must be positive, got {}", self.zone_in_distance),
            });
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
