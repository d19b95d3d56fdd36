//! Metric samples and streaming aggregation

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::{ExperimentId, VariantId};

/// Default bound on retained raw values per accumulator
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 1000;

/// Errors raised while recording metric values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricError {
    #[error("Metric '{0}' is not declared by the experiment")]
    UnknownMetric(String),

    #[error("Metric value must be finite, got {0}")]
    NotFinite(f64),
}

/// A single observed outcome value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub sample_id: uuid::Uuid,
    pub experiment_id: ExperimentId,
    pub variant_id: VariantId,
    pub metric_name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    /// Create a new sample timestamped now
    pub fn new(
        experiment_id: ExperimentId,
        variant_id: VariantId,
        metric_name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            sample_id: uuid::Uuid::new_v4(),
            experiment_id,
            variant_id,
            metric_name: metric_name.into(),
            value,
            recorded_at: Utc::now(),
        }
    }
}

// ============================================================================
// MetricAccumulator
// ============================================================================

/// Streaming accumulator for one (experiment, variant, metric) stream
///
/// Uses Welford's online algorithm for count/mean/variance so memory stays
/// constant regardless of volume, plus a bounded reservoir (Algorithm R) of
/// raw values for rank-based and bootstrap tests. The reservoir trades
/// exactness for bounded memory; estimation error shrinks with its capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    reservoir: Vec<f64>,
    reservoir_capacity: usize,
}

impl MetricAccumulator {
    /// Create an accumulator with the default reservoir capacity
    pub fn new() -> Self {
        Self::with_reservoir_capacity(DEFAULT_RESERVOIR_CAPACITY)
    }

    /// Create an accumulator with a custom reservoir capacity
    pub fn with_reservoir_capacity(capacity: usize) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            reservoir: Vec::new(),
            reservoir_capacity: capacity,
        }
    }

    /// Fold one observation into the running moments and the reservoir
    pub fn observe(&mut self, value: f64) {
        self.count += 1;

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);

        if self.reservoir.len() < self.reservoir_capacity {
            self.reservoir.push(value);
        } else if self.reservoir_capacity > 0 {
            // Algorithm R: replace a random slot with probability capacity/count
            let slot = rand::thread_rng().gen_range(0..self.count as usize);
            if slot < self.reservoir_capacity {
                self.reservoir[slot] = value;
            }
        }
    }

    /// Number of observed values
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Running mean (0 when empty)
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance with n-1 denominator (0 below 2 observations)
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / (self.count - 1) as f64
    }

    /// Sample standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Retained raw values (bounded subsample once count exceeds capacity)
    pub fn reservoir(&self) -> &[f64] {
        &self.reservoir
    }

    /// Produce a point-in-time summary
    pub fn summarize(
        &self,
        experiment_id: ExperimentId,
        variant_id: VariantId,
        metric_name: impl Into<String>,
    ) -> VariantMetricSummary {
        VariantMetricSummary {
            experiment_id,
            variant_id,
            metric_name: metric_name.into(),
            sample_size: self.count,
            mean: self.mean,
            variance: self.variance(),
            std_dev: self.std_dev(),
            raw_values: self.reservoir.clone(),
        }
    }
}

impl Default for MetricAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// VariantMetricSummary
// ============================================================================

/// Derived per-(experiment, variant, metric) summary
///
/// Recomputed from the accumulator on demand; never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantMetricSummary {
    pub experiment_id: ExperimentId,
    pub variant_id: VariantId,
    pub metric_name: String,
    pub sample_size: u64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    /// Bounded subsample of raw values for distribution-sensitive tests
    pub raw_values: Vec<f64>,
}

impl VariantMetricSummary {
    /// An empty summary for a stream with no observations yet
    pub fn empty(
        experiment_id: ExperimentId,
        variant_id: VariantId,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id,
            variant_id,
            metric_name: metric_name.into(),
            sample_size: 0,
            mean: 0.0,
            variance: 0.0,
            std_dev: 0.0,
            raw_values: Vec::new(),
        }
    }
}
