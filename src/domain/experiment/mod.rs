//! Experiment domain module
//!
//! Types and traits for the experimentation engine: experiment
//! configuration, lifecycle state, traffic assignment, metric aggregation
//! and statistical analysis results.

mod analysis;
mod assignment;
mod entity;
mod metrics;
mod repository;
mod validation;

// Re-export all public types
pub use analysis::{
    relative_improvement, AnalysisError, AnalysisResult, ConfidenceInterval,
    ExperimentStatusReport, FailedCriterion, MetricsSnapshot, PromotionDecision, TestKind,
    VariantStatus,
};
pub use assignment::{AllocationContext, AssignmentRecord};
pub use entity::{
    Experiment, ExperimentConfig, ExperimentId, ExperimentState, ModelRef, ModelVariant,
    SplitStrategy, SubjectId, TransitionError, VariantId,
};
pub use metrics::{
    MetricAccumulator, MetricError, MetricSample, VariantMetricSummary,
    DEFAULT_RESERVOIR_CAPACITY,
};
pub use repository::{AssignmentStore, ExperimentQuery, ExperimentRepository, MetricRepository};
pub use validation::{
    validate_config, validate_experiment_id, validate_subject_id, validate_variant_id,
    ConfigError, MAX_ID_LENGTH, TRAFFIC_SUM_TOLERANCE,
};

#[cfg(test)]
pub use repository::mock::MockExperimentRepository;
