use serde::Deserialize;

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub promotion: PromotionPolicy,
    pub logging: LoggingConfig,
}

/// Core engine knobs
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Lowest `minimum_sample_size` an experiment may declare
    pub min_sample_floor: u64,
    /// Raw values retained per (variant, metric) stream
    pub reservoir_capacity: usize,
    /// Seconds to wait for a notifier before giving up on delivery
    pub notification_timeout_secs: u64,
}

/// Criteria a variant must clear before auto-promotion
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionPolicy {
    /// Required relative improvement on the primary metric, in percent
    pub min_relative_improvement: f64,
    /// Required sample size on both sides of the comparison
    pub min_sample_size: u64,
    /// Required achieved confidence (1 - p)
    pub min_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            promotion: PromotionPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_sample_floor: 30,
            reservoir_capacity: 1000,
            notification_timeout_secs: 5,
        }
    }
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_relative_improvement: 1.0,
            min_sample_size: 1000,
            min_confidence: 0.95,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("ABENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.min_sample_floor, 30);
        assert_eq!(config.engine.reservoir_capacity, 1000);
        assert_eq!(config.engine.notification_timeout_secs, 5);
        assert_eq!(config.promotion.min_sample_size, 1000);
        assert!((config.promotion.min_confidence - 0.95).abs() < 1e-9);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_from_toml() {
        let raw = r#"
            [engine]
            min_sample_floor = 50
            reservoir_capacity = 200
            notification_timeout_secs = 2

            [promotion]
            min_relative_improvement = 2.5
            min_sample_size = 500
            min_confidence = 0.99

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engine.min_sample_floor, 50);
        assert!((config.promotion.min_relative_improvement - 2.5).abs() < 1e-9);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
