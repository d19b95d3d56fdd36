//! Experiment configuration validation

use std::collections::HashSet;

use thiserror::Error;

use super::entity::ExperimentConfig;

/// Maximum length for experiment and variant IDs
pub const MAX_ID_LENGTH: usize = 50;

/// Tolerance when checking that traffic percentages sum to 100
pub const TRAFFIC_SUM_TOLERANCE: f64 = 0.01;

/// Structural configuration errors
///
/// Returned before any mutation; the first violation wins.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("ID cannot be empty")]
    EmptyId,

    #[error("ID exceeds maximum length of {0} characters")]
    IdTooLong(usize),

    #[error("ID must start and end with a letter or number")]
    InvalidIdBoundary,

    #[error("ID contains invalid character: '{0}'")]
    InvalidIdCharacter(char),

    #[error("Subject ID cannot be empty")]
    EmptySubjectId,

    #[error("Experiment must have at least 2 variants")]
    InsufficientVariants,

    #[error("Duplicate variant ID: '{0}'")]
    DuplicateVariantId(String),

    #[error("Traffic percentage for variant '{0}' is negative")]
    NegativeTrafficPercentage(String),

    #[error("Traffic percentages must sum to 100, got {0}")]
    InvalidTrafficSum(f64),

    #[error("Experiment must have exactly one control variant, got {0}")]
    ControlVariantCount(usize),

    #[error("Primary metric name cannot be empty")]
    EmptyPrimaryMetric,

    #[error("Metric '{0}' appears as both primary and secondary")]
    DuplicateMetric(String),

    #[error("Minimum sample size {got} is below the floor of {floor}")]
    SampleSizeBelowFloor { got: u64, floor: u64 },

    #[error("Confidence level must be strictly between 0 and 1, got {0}")]
    InvalidConfidenceLevel(f64),

    #[error("Statistical power must be strictly between 0 and 1, got {0}")]
    InvalidStatisticalPower(f64),

    #[error("Significance threshold must be strictly between 0 and 1, got {0}")]
    InvalidSignificanceThreshold(f64),

    #[error("Experiment '{0}' is already registered with a different configuration")]
    DuplicateId(String),
}

fn validate_id_syntax(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::EmptyId);
    }

    if id.len() > MAX_ID_LENGTH {
        return Err(ConfigError::IdTooLong(MAX_ID_LENGTH));
    }

    match (id.chars().next(), id.chars().last()) {
        (Some(first), Some(last))
            if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() => {}
        _ => return Err(ConfigError::InvalidIdBoundary),
    }

    for ch in id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' && ch != '_' {
            return Err(ConfigError::InvalidIdCharacter(ch));
        }
    }

    Ok(())
}

/// Validate an experiment ID
pub fn validate_experiment_id(id: &str) -> Result<(), ConfigError> {
    validate_id_syntax(id)
}

/// Validate a variant ID
pub fn validate_variant_id(id: &str) -> Result<(), ConfigError> {
    validate_id_syntax(id)
}

/// Validate a subject ID (opaque, only required to be non-empty)
pub fn validate_subject_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::EmptySubjectId);
    }
    Ok(())
}

/// Validate a full experiment configuration against the registry rules
///
/// `sample_size_floor` is the engine-level minimum below which an experiment
/// can never reach significance and is rejected outright.
pub fn validate_config(config: &ExperimentConfig, sample_size_floor: u64) -> Result<(), ConfigError> {
    if config.variants().len() < 2 {
        return Err(ConfigError::InsufficientVariants);
    }

    let mut seen = HashSet::new();

    for variant in config.variants() {
        if !seen.insert(variant.id().as_str()) {
            return Err(ConfigError::DuplicateVariantId(
                variant.id().as_str().to_string(),
            ));
        }

        if variant.traffic_percentage() < 0.0 {
            return Err(ConfigError::NegativeTrafficPercentage(
                variant.id().as_str().to_string(),
            ));
        }
    }

    let total: f64 = config.variants().iter().map(|v| v.traffic_percentage()).sum();

    if (total - 100.0).abs() > TRAFFIC_SUM_TOLERANCE {
        return Err(ConfigError::InvalidTrafficSum(total));
    }

    let control_count = config.variants().iter().filter(|v| v.is_control()).count();

    if control_count != 1 {
        return Err(ConfigError::ControlVariantCount(control_count));
    }

    if config.primary_metric().is_empty() {
        return Err(ConfigError::EmptyPrimaryMetric);
    }

    if config
        .secondary_metrics()
        .iter()
        .any(|m| m == config.primary_metric())
    {
        return Err(ConfigError::DuplicateMetric(
            config.primary_metric().to_string(),
        ));
    }

    if config.minimum_sample_size() < sample_size_floor {
        return Err(ConfigError::SampleSizeBelowFloor {
            got: config.minimum_sample_size(),
            floor: sample_size_floor,
        });
    }

    if config.confidence_level() <= 0.0 || config.confidence_level() >= 1.0 {
        return Err(ConfigError::InvalidConfidenceLevel(config.confidence_level()));
    }

    if config.statistical_power() <= 0.0 || config.statistical_power() >= 1.0 {
        return Err(ConfigError::InvalidStatisticalPower(config.statistical_power()));
    }

    if config.significance_threshold() <= 0.0 || config.significance_threshold() >= 1.0 {
        return Err(ConfigError::InvalidSignificanceThreshold(
            config.significance_threshold(),
        ));
    }

    Ok(())
}
