//! Analysis results and promotion decision types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::{ExperimentId, ExperimentState, VariantId};
use super::metrics::VariantMetricSummary;

/// Errors raised by the statistical analyzer
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Experiment has no control variant")]
    MissingControlVariant,
}

/// Which two-sample test to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Welch's t-test on aggregate moments (unequal variances assumed)
    #[default]
    WelchT,
    /// Mann-Whitney U over retained raw values (rank-based)
    MannWhitneyU,
    /// Bootstrap resampling of the mean difference over retained raw values
    Bootstrap,
}

/// Two-sided confidence interval around the mean difference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl ConfidenceInterval {
    /// Check whether the interval excludes zero
    pub fn excludes_zero(&self) -> bool {
        self.lower > 0.0 || self.upper < 0.0
    }
}

// ============================================================================
// AnalysisResult
// ============================================================================

/// Outcome of comparing one treatment variant against the control on one metric
///
/// Ephemeral: recomputed on demand from a metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub metric_name: String,
    pub control_variant_id: VariantId,
    pub treatment_variant_id: VariantId,
    pub test: TestKind,
    pub test_statistic: f64,
    pub p_value: f64,
    /// Percentage change vs control; NaN when the control mean is zero
    pub relative_improvement: f64,
    pub confidence_interval: ConfidenceInterval,
    pub control_mean: f64,
    pub treatment_mean: f64,
    pub control_sample_size: u64,
    pub treatment_sample_size: u64,
    /// True when either side is below the experiment's minimum sample size;
    /// such results always report `is_significant = false`
    pub insufficient_data: bool,
    pub is_significant: bool,
}

impl AnalysisResult {
    /// Confidence achieved by this comparison (1 - p), clamped to [0, 1]
    pub fn achieved_confidence(&self) -> f64 {
        if self.p_value.is_nan() {
            return 0.0;
        }
        (1.0 - self.p_value).clamp(0.0, 1.0)
    }
}

/// Relative improvement of treatment over control in percent
///
/// NaN when the control mean is zero (undefined, never an error).
pub fn relative_improvement(control_mean: f64, treatment_mean: f64) -> f64 {
    if control_mean == 0.0 {
        return f64::NAN;
    }
    (treatment_mean - control_mean) / control_mean * 100.0
}

// ============================================================================
// MetricsSnapshot
// ============================================================================

/// A consistent point-in-time view of all metric summaries for one experiment
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    summaries: HashMap<(VariantId, String), VariantMetricSummary>,
}

impl MetricsSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a summary for a (variant, metric) pair
    pub fn insert(&mut self, summary: VariantMetricSummary) {
        self.summaries.insert(
            (summary.variant_id.clone(), summary.metric_name.clone()),
            summary,
        );
    }

    /// Look up the summary for a (variant, metric) pair
    pub fn get(&self, variant_id: &VariantId, metric_name: &str) -> Option<&VariantMetricSummary> {
        self.summaries
            .get(&(variant_id.clone(), metric_name.to_string()))
    }

    /// Number of summaries in the snapshot
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    /// Whether the snapshot holds no summaries
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

// ============================================================================
// Status report
// ============================================================================

/// Per-variant sample count on the primary metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStatus {
    pub variant_id: VariantId,
    pub is_control: bool,
    pub primary_metric_samples: u64,
}

/// Point-in-time status of an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentStatusReport {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub state: ExperimentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_hours: Option<f64>,
    pub variants: Vec<VariantStatus>,
    pub total_primary_samples: u64,
}

// ============================================================================
// Promotion
// ============================================================================

/// A promotion criterion that was not met, with the observed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "snake_case")]
pub enum FailedCriterion {
    MinimumImprovement { required: f64, achieved: f64 },
    MinimumSampleSize { required: u64, achieved: u64 },
    MinimumConfidence { required: f64, achieved: f64 },
    NotSignificant { p_value: f64 },
}

impl std::fmt::Display for FailedCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinimumImprovement { required, achieved } => write!(
                f,
                "relative improvement {achieved:.2}% below required {required:.2}%"
            ),
            Self::MinimumSampleSize { required, achieved } => {
                write!(f, "sample size {achieved} below required {required}")
            }
            Self::MinimumConfidence { required, achieved } => write!(
                f,
                "achieved confidence {achieved:.3} below required {required:.3}"
            ),
            Self::NotSignificant { p_value } => {
                write!(f, "primary metric not significant (p = {p_value:.4})")
            }
        }
    }
}

/// Outcome of a promotion request
///
/// Either the variant was promoted, or the request was refused with every
/// failed criterion enumerated. Never partially applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionDecision {
    Promoted {
        variant_id: VariantId,
    },
    Refused {
        variant_id: VariantId,
        failed: Vec<FailedCriterion>,
    },
}

impl PromotionDecision {
    /// Whether the variant was promoted
    pub fn is_promoted(&self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}
