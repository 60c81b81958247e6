//! Configuration system
//!
//! Batches take their initial capacity and growth ratio from [`BatchConfig`].
//! Any config type can be loaded from or saved to TOML and RON files through
//! the [`Config`] trait.

pub use serde::{Deserialize, Serialize};

/// Capacity used when a batch is created with a capacity of zero
pub const DEFAULT_SPRITE_BATCH_CAPACITY: usize = 29;

/// Capacity used when a particle batch is created with a capacity of zero
pub const DEFAULT_PARTICLE_BATCH_CAPACITY: usize = 500;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value was parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Ratio applied to a quad buffer's capacity when an insert would overflow it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthFactor {
    /// Ratio numerator
    pub numerator: usize,
    /// Ratio denominator
    pub denominator: usize,
}

impl GrowthFactor {
    /// Capacity to grow to from `capacity`, in integer arithmetic: `(capacity + 1) * n / d`
    pub fn next_capacity(&self, capacity: usize) -> usize {
        ((capacity + 1) * self.numerator / self.denominator).max(capacity + 1)
    }
}

impl Default for GrowthFactor {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 3,
        }
    }
}

/// Batch creation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Capacity of a sprite batch created with capacity 0
    pub initial_capacity: usize,
    /// Capacity of a particle batch created with capacity 0
    pub particle_capacity: usize,
    /// Growth ratio on overflow
    pub growth: GrowthFactor,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_SPRITE_BATCH_CAPACITY,
            particle_capacity: DEFAULT_PARTICLE_BATCH_CAPACITY,
            growth: GrowthFactor::default(),
        }
    }
}

impl Config for BatchConfig {}

impl BatchConfig {
    /// Reject configurations that could never grow a buffer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.growth.denominator == 0 {
            return Err(ConfigError::Invalid("growth denominator is zero".to_string()));
        }
        if self.growth.numerator <= self.growth.denominator {
            return Err(ConfigError::Invalid(format!(
                "growth ratio {}/{} does not grow",
                self.growth.numerator, self.growth.denominator
            )));
        }
        Ok(())
    }

    /// Resolve a requested sprite batch capacity (0 means "use the default")
    pub fn sprite_capacity_or_default(&self, requested: usize) -> usize {
        if requested == 0 {
            self.initial_capacity
        } else {
            requested
        }
    }

    /// Resolve a requested particle batch capacity (0 means "use the default")
    pub fn particle_capacity_or_default(&self, requested: usize) -> usize {
        if requested == 0 {
            self.particle_capacity
        } else {
            requested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_matches_integer_arithmetic() {
        let growth = GrowthFactor::default();
        assert_eq!(growth.next_capacity(4), 6);
        assert_eq!(growth.next_capacity(29), 40);
        assert_eq!(growth.next_capacity(0), 1);
        assert_eq!(growth.next_capacity(1), 2);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sprite_capacity_or_default(0), 29);
        assert_eq!(config.sprite_capacity_or_default(7), 7);
        assert_eq!(config.particle_capacity_or_default(0), 500);
    }

    #[test]
    fn test_non_growing_ratio_rejected() {
        let config = BatchConfig {
            growth: GrowthFactor {
                numerator: 3,
                denominator: 3,
            },
            ..BatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let path = std::env::temp_dir().join("batch_engine_config_test.toml");
        let path = path.to_string_lossy().to_string();

        let config = BatchConfig {
            initial_capacity: 64,
            ..BatchConfig::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = BatchConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: BatchConfig = ron::from_str("(initial_capacity: 12)").unwrap();
        assert_eq!(config.initial_capacity, 12);
        assert_eq!(config.growth, GrowthFactor::default());
    }

    #[test]
    fn test_unsupported_extension() {
        let result = BatchConfig::load_from_file("settings.ini");
        assert!(result.is_err());
    }
}
