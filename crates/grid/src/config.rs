use serde::{Deserialize, Serialize};

/// Errors from grid construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("invalid grid config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

/// Grid geometry: a square map of `map_width` units centred on the origin,
/// split into `chunks_across` × `chunks_across` region cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Width of the world plane in world units.
    pub map_width: f32,
    /// Number of cells along each axis.
    pub chunks_across: u32,
    /// Load ranges at or above this radius pass every distance test.
    pub unlimited_range: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            map_width: 16384.0,
            chunks_across: 16,
            unlimited_range: 16384.0,
        }
    }
}

impl GridConfig {
    /// World units covered by one cell along an axis.
    pub fn chunk_width(&self) -> f32 {
        self.map_width / self.chunks_across as f32
    }

    pub fn half_width(&self) -> f32 {
        self.map_width / 2.0
    }

    pub fn validate(&self) -> Result<(), GridError> {
        if !(self.map_width.is_finite() && self.map_width > 0.0) {
            return Err(GridError::InvalidConfig {
                field: "map_width",
                reason: format!("must be positive, got {}", self.map_width),
            });
        }
        if self.chunks_across == 0 {
            return Err(GridError::InvalidConfig {
                field: "chunks_across",
                reason: "must be at least 1".into(),
            });
        }
        if self.unlimited_range.is_nan() || self.unlimited_range <= 0.0 {
            return Err(GridError::InvalidConfig {
                field: "unlimited_range",
                reason: format!("must be positive, got {}", self.unlimited_range),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_give_1024_unit_chunks() {
        let config = GridConfig::default();
        assert_eq!(config.chunk_width(), 1024.0);
        assert_eq!(config.half_width(), 8192.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunks() {
        let config = GridConfig {
            chunks_across: 0,
            ..GridConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GridError::InvalidConfig { field: "chunks_across", .. })
        ));
    }

    #[test]
    fn rejects_non_positive_width() {
        let config = GridConfig {
            map_width: -1.0,
            ..GridConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
