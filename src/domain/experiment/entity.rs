//! Experiment domain entities

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::validation::{validate_experiment_id, validate_subject_id, validate_variant_id, ConfigError};

// ============================================================================
// ExperimentId
// ============================================================================

/// Unique identifier for an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Create a new experiment ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        validate_experiment_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExperimentId> for String {
    fn from(id: ExperimentId) -> Self {
        id.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// VariantId
// ============================================================================

/// Unique identifier for a variant within an experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantId(String);

impl VariantId {
    /// Create a new variant ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        validate_variant_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VariantId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VariantId> for String {
    fn from(id: VariantId) -> Self {
        id.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VariantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SubjectId
// ============================================================================

/// Identifier for the entity being assigned to a variant (e.g. a user)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a new subject ID (must be non-empty)
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        validate_subject_id(&id)?;
        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(id: SubjectId) -> Self {
        id.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ExperimentState
// ============================================================================

/// Lifecycle state of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Experiment is being configured, not yet routing traffic
    #[default]
    Draft,
    /// Experiment is routing traffic and collecting samples
    Running,
    /// Minimum sample size reached, periodic re-analysis in progress
    Monitoring,
    /// Data collection finished, awaiting a promotion decision
    Completed,
    /// A treatment variant has replaced the control in production
    Promoted,
    /// Experiment was stopped without a decision
    Aborted,
}

impl ExperimentState {
    /// Check if the experiment accepts traffic allocation
    pub fn is_allocatable(&self) -> bool {
        matches!(self, Self::Running | Self::Monitoring)
    }

    /// Check if the experiment can accept configuration changes
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Promoted | Self::Aborted)
    }

    /// Check if a transition to the target state is valid
    pub fn can_transition_to(&self, target: ExperimentState) -> bool {
        match (self, target) {
            // Draft -> Running (start)
            (Self::Draft, Self::Running) => true,
            // Running -> Monitoring (minimum sample size reached)
            (Self::Running, Self::Monitoring) => true,
            // Monitoring -> Completed (manual stop, max duration, early stopping)
            (Self::Monitoring, Self::Completed) => true,
            // Completed -> Promoted (promotion criteria met)
            (Self::Completed, Self::Promoted) => true,
            // Any non-terminal state -> Aborted
            (from, Self::Aborted) if !from.is_terminal() => true,
            // All other transitions are invalid
            _ => false,
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Completed => write!(f, "completed"),
            Self::Promoted => write!(f, "promoted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Error for invalid lifecycle transitions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid experiment state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ExperimentState,
    pub to: ExperimentState,
}

// ============================================================================
// ModelRef
// ============================================================================

/// Reference to a servable model identity and version
///
/// Opaque to the engine: allocation routes by variant id, the serving layer
/// resolves the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model_id: String,
    pub version: String,
}

impl ModelRef {
    /// Create a new model reference
    pub fn new(model_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model_id, self.version)
    }
}

// ============================================================================
// SplitStrategy
// ============================================================================

/// Traffic-split strategy for an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Deterministic hash of (experiment_id, subject_id)
    #[default]
    SubjectHash,
    /// Uniform random draw on first allocation, stable thereafter
    Random,
    /// Hash of the subject's region attribute (falls back to subject hash)
    Geographic,
}

impl fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubjectHash => write!(f, "subject_hash"),
            Self::Random => write!(f, "random"),
            Self::Geographic => write!(f, "geographic"),
        }
    }
}

// ============================================================================
// ModelVariant
// ============================================================================

/// One arm of an experiment, including the designated control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVariant {
    id: VariantId,
    model: ModelRef,
    traffic_percentage: f64,
    control: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ModelVariant {
    /// Create a new variant
    pub fn new(id: VariantId, model: ModelRef, traffic_percentage: f64) -> Self {
        Self {
            id,
            model,
            traffic_percentage,
            control: false,
            description: None,
        }
    }

    /// Mark this variant as the control
    pub fn with_control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Get the variant ID
    pub fn id(&self) -> &VariantId {
        &self.id
    }

    /// Get the model reference
    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    /// Get the traffic percentage (0-100)
    pub fn traffic_percentage(&self) -> f64 {
        self.traffic_percentage
    }

    /// Check if this is the control variant
    pub fn is_control(&self) -> bool {
        self.control
    }

    /// Get the description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

// ============================================================================
// ExperimentConfig
// ============================================================================

/// Full configuration of an experiment
///
/// Owned by the registry. Immutable once the experiment leaves Draft;
/// compared structurally to allow idempotent re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    id: ExperimentId,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    variants: Vec<ModelVariant>,
    split_strategy: SplitStrategy,
    primary_metric: String,
    secondary_metrics: Vec<String>,
    minimum_sample_size: u64,
    confidence_level: f64,
    statistical_power: f64,
    max_duration_secs: u64,
    early_stopping: bool,
    significance_threshold: f64,
}

impl ExperimentConfig {
    /// Create a new configuration with engine defaults
    pub fn new(id: ExperimentId, name: impl Into<String>, primary_metric: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            variants: Vec::new(),
            split_strategy: SplitStrategy::default(),
            primary_metric: primary_metric.into(),
            secondary_metrics: Vec::new(),
            minimum_sample_size: 100,
            confidence_level: 0.95,
            statistical_power: 0.8,
            max_duration_secs: 14 * 24 * 3600,
            early_stopping: false,
            significance_threshold: 0.05,
        }
    }

    // Builder methods

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a variant
    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Set the traffic-split strategy
    pub fn with_split_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.split_strategy = strategy;
        self
    }

    /// Add a secondary metric
    pub fn with_secondary_metric(mut self, metric: impl Into<String>) -> Self {
        self.secondary_metrics.push(metric.into());
        self
    }

    /// Set the minimum sample size per variant
    pub fn with_minimum_sample_size(mut self, size: u64) -> Self {
        self.minimum_sample_size = size;
        self
    }

    /// Set the confidence level (exclusive 0-1)
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    /// Set the statistical power target (exclusive 0-1)
    pub fn with_statistical_power(mut self, power: f64) -> Self {
        self.statistical_power = power;
        self
    }

    /// Set the maximum experiment duration
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration_secs = duration.num_seconds().max(0) as u64;
        self
    }

    /// Enable or disable early stopping
    pub fn with_early_stopping(mut self, enabled: bool) -> Self {
        self.early_stopping = enabled;
        self
    }

    /// Set the significance threshold (maximum p-value)
    pub fn with_significance_threshold(mut self, threshold: f64) -> Self {
        self.significance_threshold = threshold;
        self
    }

    // Getters

    /// Get the experiment ID
    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    /// Get the experiment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get all variants in declaration order
    pub fn variants(&self) -> &[ModelVariant] {
        &self.variants
    }

    /// Get the traffic-split strategy
    pub fn split_strategy(&self) -> SplitStrategy {
        self.split_strategy
    }

    /// Get the primary metric name
    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    /// Get the secondary metric names
    pub fn secondary_metrics(&self) -> &[String] {
        &self.secondary_metrics
    }

    /// Get the minimum sample size per variant
    pub fn minimum_sample_size(&self) -> u64 {
        self.minimum_sample_size
    }

    /// Get the configured confidence level
    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Get the statistical power target
    pub fn statistical_power(&self) -> f64 {
        self.statistical_power
    }

    /// Get the maximum duration
    pub fn max_duration(&self) -> Duration {
        Duration::seconds(self.max_duration_secs as i64)
    }

    /// Check if early stopping is enabled
    pub fn early_stopping(&self) -> bool {
        self.early_stopping
    }

    /// Get the significance threshold
    pub fn significance_threshold(&self) -> f64 {
        self.significance_threshold
    }

    /// Get the control variant if one exists
    pub fn control_variant(&self) -> Option<&ModelVariant> {
        self.variants.iter().find(|v| v.is_control())
    }

    /// Look up a variant by ID
    pub fn variant(&self, id: &VariantId) -> Option<&ModelVariant> {
        self.variants.iter().find(|v| v.id() == id)
    }

    /// Check if a metric name is declared (primary or secondary)
    pub fn declares_metric(&self, name: &str) -> bool {
        self.primary_metric == name || self.secondary_metrics.iter().any(|m| m == name)
    }

    /// Select a variant for a bucket value in [0, 100)
    ///
    /// Walks variants in declaration order accumulating traffic percentages;
    /// the first variant whose cumulative boundary exceeds the bucket wins.
    pub fn variant_for_bucket(&self, bucket: f64) -> Option<&ModelVariant> {
        let mut cumulative = 0.0;

        for variant in &self.variants {
            cumulative += variant.traffic_percentage();

            if bucket < cumulative {
                return Some(variant);
            }
        }

        None
    }
}

// ============================================================================
// Experiment
// ============================================================================

/// An experiment with its lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    config: ExperimentConfig,
    state: ExperimentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    monitoring_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Experiment {
    /// Create a new experiment in Draft state
    pub fn new(config: ExperimentConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            state: ExperimentState::Draft,
            started_at: None,
            monitoring_since: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Get the experiment ID
    pub fn id(&self) -> &ExperimentId {
        self.config.id()
    }

    /// Get the current state
    pub fn state(&self) -> ExperimentState {
        self.state
    }

    /// Get when the experiment was started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get when the experiment entered Monitoring
    pub fn monitoring_since(&self) -> Option<DateTime<Utc>> {
        self.monitoring_since
    }

    /// Get when the experiment was completed
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Get when the experiment was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get when the experiment was last updated
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace the configuration (Draft only; enforced by the service)
    pub fn set_config(&mut self, config: ExperimentConfig) {
        self.config = config;
        self.touch();
    }

    /// Check if max_duration has elapsed at the given instant
    pub fn max_duration_exceeded(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) => now - started >= self.config.max_duration(),
            None => false,
        }
    }

    // State transitions

    fn transition(&mut self, target: ExperimentState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(TransitionError {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        self.touch();
        Ok(())
    }

    /// Start the experiment (Draft -> Running)
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(ExperimentState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Enter the monitoring phase (Running -> Monitoring)
    pub fn begin_monitoring(&mut self) -> Result<(), TransitionError> {
        self.transition(ExperimentState::Monitoring)?;
        self.monitoring_since = Some(Utc::now());
        Ok(())
    }

    /// Stop data collection (Monitoring -> Completed)
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(ExperimentState::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Promote the winning variant (Completed -> Promoted)
    pub fn promote(&mut self) -> Result<(), TransitionError> {
        self.transition(ExperimentState::Promoted)
    }

    /// Abort the experiment (any non-terminal state -> Aborted)
    pub fn abort(&mut self) -> Result<(), TransitionError> {
        self.transition(ExperimentState::Aborted)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
