//! In-memory metric repository
//!
//! Holds one streaming accumulator per (experiment, variant, metric) stream.
//! Appends take the map read lock plus the stream's own mutex, so unrelated
//! streams never contend; the map write lock is taken only when a stream is
//! first seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::experiment::{
    DEFAULT_RESERVOIR_CAPACITY, ExperimentId, MetricAccumulator, MetricRepository, MetricSample,
    VariantId, VariantMetricSummary,
};

type StreamKey = (ExperimentId, VariantId, String);

/// Thread-safe in-memory streaming metric store
#[derive(Debug)]
pub struct InMemoryMetricRepository {
    streams: RwLock<HashMap<StreamKey, Arc<Mutex<MetricAccumulator>>>>,
    reservoir_capacity: usize,
}

impl InMemoryMetricRepository {
    pub fn new() -> Self {
        Self::with_reservoir_capacity(DEFAULT_RESERVOIR_CAPACITY)
    }

    /// Create a repository whose accumulators retain at most `capacity` raw values
    pub fn with_reservoir_capacity(capacity: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            reservoir_capacity: capacity,
        }
    }

    fn stream(&self, key: StreamKey) -> Result<Arc<Mutex<MetricAccumulator>>, DomainError> {
        {
            let streams = self
                .streams
                .read()
                .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

            if let Some(accumulator) = streams.get(&key) {
                return Ok(accumulator.clone());
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        Ok(streams
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(MetricAccumulator::with_reservoir_capacity(
                    self.reservoir_capacity,
                )))
            })
            .clone())
    }
}

impl Default for InMemoryMetricRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricRepository for InMemoryMetricRepository {
    async fn append(&self, sample: MetricSample) -> Result<(), DomainError> {
        let key = (
            sample.experiment_id.clone(),
            sample.variant_id.clone(),
            sample.metric_name.clone(),
        );

        let stream = self.stream(key)?;
        let mut accumulator = stream
            .lock()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        accumulator.observe(sample.value);

        debug!(
            experiment_id = %sample.experiment_id,
            variant_id = %sample.variant_id,
            metric_name = %sample.metric_name,
            count = accumulator.count(),
            "Recorded metric sample"
        );

        Ok(())
    }

    async fn summarize(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        metric_name: &str,
    ) -> Result<VariantMetricSummary, DomainError> {
        let key = (
            experiment_id.clone(),
            variant_id.clone(),
            metric_name.to_string(),
        );

        let streams = self
            .streams
            .read()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        match streams.get(&key) {
            Some(stream) => {
                let accumulator = stream
                    .lock()
                    .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;
                Ok(accumulator.summarize(
                    experiment_id.clone(),
                    variant_id.clone(),
                    metric_name,
                ))
            }
            None => Ok(VariantMetricSummary::empty(
                experiment_id.clone(),
                variant_id.clone(),
                metric_name,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{ExperimentConfig, ModelRef, ModelVariant};

    fn sample(variant: &str, metric: &str, value: f64) -> MetricSample {
        MetricSample::new(
            ExperimentId::new("exp-metrics").unwrap(),
            VariantId::new(variant).unwrap(),
            metric,
            value,
        )
    }

    #[tokio::test]
    async fn test_append_and_summarize() {
        let repo = InMemoryMetricRepository::new();
        for value in [10.0, 20.0, 30.0] {
            repo.append(sample("control", "latency_ms", value))
                .await
                .unwrap();
        }

        let summary = repo
            .summarize(
                &ExperimentId::new("exp-metrics").unwrap(),
                &VariantId::new("control").unwrap(),
                "latency_ms",
            )
            .await
            .unwrap();

        assert_eq!(summary.sample_size, 3);
        assert!((summary.mean - 20.0).abs() < 1e-9);
        assert!((summary.variance - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let repo = InMemoryMetricRepository::new();
        repo.append(sample("control", "accuracy", 0.9)).await.unwrap();
        repo.append(sample("treatment", "accuracy", 0.1))
            .await
            .unwrap();
        repo.append(sample("control", "latency_ms", 120.0))
            .await
            .unwrap();

        let control = repo
            .summarize(
                &ExperimentId::new("exp-metrics").unwrap(),
                &VariantId::new("control").unwrap(),
                "accuracy",
            )
            .await
            .unwrap();
        assert_eq!(control.sample_size, 1);
        assert!((control.mean - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_stream_summary() {
        let repo = InMemoryMetricRepository::new();
        let summary = repo
            .summarize(
                &ExperimentId::new("exp-metrics").unwrap(),
                &VariantId::new("control").unwrap(),
                "accuracy",
            )
            .await
            .unwrap();

        assert_eq!(summary.sample_size, 0);
        assert_eq!(summary.mean, 0.0);
        assert!(summary.raw_values.is_empty());
    }

    #[tokio::test]
    async fn test_reservoir_stays_bounded() {
        let repo = InMemoryMetricRepository::with_reservoir_capacity(50);
        for i in 0..1000 {
            repo.append(sample("control", "latency_ms", i as f64))
                .await
                .unwrap();
        }

        let summary = repo
            .summarize(
                &ExperimentId::new("exp-metrics").unwrap(),
                &VariantId::new("control").unwrap(),
                "latency_ms",
            )
            .await
            .unwrap();

        assert_eq!(summary.sample_size, 1000);
        assert_eq!(summary.raw_values.len(), 50);
        // Moments stay exact regardless of the reservoir bound
        assert!((summary.mean - 499.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_covers_declared_pairs() {
        let repo = InMemoryMetricRepository::new();
        repo.append(sample("control", "accuracy", 0.8)).await.unwrap();

        let config = ExperimentConfig::new(
            ExperimentId::new("exp-metrics").unwrap(),
            "Snapshot test",
            "accuracy",
        )
        .with_secondary_metric("latency_ms")
        .with_variant(
            ModelVariant::new(
                VariantId::new("control").unwrap(),
                ModelRef::new("model-a", "1.0"),
                50.0,
            )
            .with_control(true),
        )
        .with_variant(ModelVariant::new(
            VariantId::new("treatment").unwrap(),
            ModelRef::new("model-b", "1.0"),
            50.0,
        ));

        let snapshot = repo.snapshot(&config).await.unwrap();

        // 2 variants x 2 metrics
        assert_eq!(snapshot.len(), 4);
        let control = snapshot
            .get(&VariantId::new("control").unwrap(), "accuracy")
            .unwrap();
        assert_eq!(control.sample_size, 1);
        let untouched = snapshot
            .get(&VariantId::new("treatment").unwrap(), "latency_ms")
            .unwrap();
        assert_eq!(untouched.sample_size, 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_count_exactly() {
        let repo = Arc::new(InMemoryMetricRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        repo.append(sample("control", "accuracy", 1.0))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let summary = repo
            .summarize(
                &ExperimentId::new("exp-metrics").unwrap(),
                &VariantId::new("control").unwrap(),
                "accuracy",
            )
            .await
            .unwrap();

        assert_eq!(summary.sample_size, 800);
    }
}
