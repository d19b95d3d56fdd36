//! Repository traits for experiments, assignments and metrics

use async_trait::async_trait;
use std::fmt::Debug;

use super::analysis::MetricsSnapshot;
use super::assignment::AssignmentRecord;
use super::entity::{Experiment, ExperimentConfig, ExperimentId, ExperimentState, SubjectId, VariantId};
use super::metrics::{MetricSample, VariantMetricSummary};
use crate::domain::DomainError;

// ============================================================================
// ExperimentQuery
// ============================================================================

/// Query parameters for listing experiments
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    /// Filter by lifecycle state
    pub state: Option<ExperimentState>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ExperimentQuery {
    /// Create a new query with no filters
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by state
    pub fn with_state(mut self, state: ExperimentState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set maximum number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set number of results to skip
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

// ============================================================================
// ExperimentRepository
// ============================================================================

/// Repository for experiment configurations and lifecycle state
#[async_trait]
pub trait ExperimentRepository: Send + Sync + Debug {
    /// Create a new experiment, failing on conflict
    async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError>;

    /// Get an experiment by ID
    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError>;

    /// Update an existing experiment
    async fn update(&self, experiment: Experiment) -> Result<Experiment, DomainError>;

    /// List experiments with optional filters, newest first
    async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError>;

    /// Check if an experiment exists
    async fn exists(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        Ok(self.get(id).await?.is_some())
    }
}

// ============================================================================
// AssignmentStore
// ============================================================================

/// Durable idempotent cache of subject assignments
///
/// `get_or_insert` must be atomic: concurrent first-time writes for the same
/// (experiment, subject) key converge on a single winner, which every caller
/// then observes. The engine never overwrites an assignment.
#[async_trait]
pub trait AssignmentStore: Send + Sync + Debug {
    /// Look up an existing assignment
    async fn get(
        &self,
        experiment_id: &ExperimentId,
        subject_id: &SubjectId,
    ) -> Result<Option<AssignmentRecord>, DomainError>;

    /// Insert the record if the key is absent, returning the stored winner
    async fn get_or_insert(
        &self,
        record: AssignmentRecord,
    ) -> Result<AssignmentRecord, DomainError>;

    /// Count assignments per variant for an experiment
    async fn count_by_variant(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<(VariantId, u64)>, DomainError>;
}

// ============================================================================
// MetricRepository
// ============================================================================

/// Append-only store and streaming aggregator for metric samples
#[async_trait]
pub trait MetricRepository: Send + Sync + Debug {
    /// Append one sample and fold it into the stream's accumulator
    async fn append(&self, sample: MetricSample) -> Result<(), DomainError>;

    /// Summarize one (experiment, variant, metric) stream
    ///
    /// Returns an empty summary when the stream has no observations.
    async fn summarize(
        &self,
        experiment_id: &ExperimentId,
        variant_id: &VariantId,
        metric_name: &str,
    ) -> Result<VariantMetricSummary, DomainError>;

    /// Build a snapshot covering every (variant, metric) pair the experiment declares
    async fn snapshot(&self, config: &ExperimentConfig) -> Result<MetricsSnapshot, DomainError> {
        let mut snapshot = MetricsSnapshot::new();
        let mut metrics: Vec<&str> = vec![config.primary_metric()];
        metrics.extend(config.secondary_metrics().iter().map(|m| m.as_str()));

        for variant in config.variants() {
            for metric in &metrics {
                let summary = self
                    .summarize(config.id(), variant.id(), metric)
                    .await?;
                snapshot.insert(summary);
            }
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
pub mod mock {
    //! Mock repositories with failure injection for service tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    /// Mock experiment repository
    #[derive(Debug, Default)]
    pub struct MockExperimentRepository {
        experiments: RwLock<HashMap<String, Experiment>>,
        should_fail: RwLock<bool>,
    }

    impl MockExperimentRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_error(self) -> Self {
            *self.should_fail.write().unwrap() = true;
            self
        }

        /// Toggle failure injection after construction
        pub fn set_failing(&self, failing: bool) {
            *self.should_fail.write().unwrap() = failing;
        }

        fn check_should_fail(&self) -> Result<(), DomainError> {
            if *self.should_fail.read().unwrap() {
                Err(DomainError::storage("Mock error"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ExperimentRepository for MockExperimentRepository {
        async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
            self.check_should_fail()?;
            let id = experiment.id().as_str().to_string();
            let mut experiments = self.experiments.write().unwrap();

            if experiments.contains_key(&id) {
                return Err(DomainError::conflict(format!(
                    "Experiment '{}' already exists",
                    id
                )));
            }

            experiments.insert(id, experiment.clone());
            Ok(experiment)
        }

        async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
            self.check_should_fail()?;
            Ok(self.experiments.read().unwrap().get(id.as_str()).cloned())
        }

        async fn update(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
            self.check_should_fail()?;
            let id = experiment.id().as_str().to_string();
            let mut experiments = self.experiments.write().unwrap();

            if !experiments.contains_key(&id) {
                return Err(DomainError::not_found(format!(
                    "Experiment '{}' not found",
                    id
                )));
            }

            experiments.insert(id, experiment.clone());
            Ok(experiment)
        }

        async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
            self.check_should_fail()?;
            let experiments = self.experiments.read().unwrap();

            let mut results: Vec<_> = experiments
                .values()
                .filter(|e| query.state.is_none_or(|s| e.state() == s))
                .cloned()
                .collect();

            results.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

            let offset = query.offset.unwrap_or(0);
            let limit = query.limit.unwrap_or(usize::MAX);

            Ok(results.into_iter().skip(offset).take(limit).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockExperimentRepository;
    use super::*;
    use crate::domain::experiment::{ModelRef, ModelVariant};

    fn test_experiment(id: &str) -> Experiment {
        let config = ExperimentConfig::new(
            ExperimentId::new(id).unwrap(),
            format!("Experiment {}", id),
            "accuracy",
        )
        .with_variant(
            ModelVariant::new(
                VariantId::new("control").unwrap(),
                ModelRef::new("scorer", "1.0"),
                50.0,
            )
            .with_control(true),
        )
        .with_variant(ModelVariant::new(
            VariantId::new("treatment").unwrap(),
            ModelRef::new("scorer", "2.0"),
            50.0,
        ));

        Experiment::new(config)
    }

    #[tokio::test]
    async fn test_mock_repository_crud() {
        let repo = MockExperimentRepository::new();

        let created = repo.create(test_experiment("test-1")).await.unwrap();
        assert_eq!(created.id().as_str(), "test-1");

        let id = ExperimentId::new("test-1").unwrap();
        assert!(repo.get(&id).await.unwrap().is_some());
        assert!(repo.exists(&id).await.unwrap());

        let mut fetched = repo.get(&id).await.unwrap().unwrap();
        fetched.start().unwrap();
        let updated = repo.update(fetched).await.unwrap();
        assert_eq!(updated.state(), ExperimentState::Running);
    }

    #[tokio::test]
    async fn test_mock_repository_conflict() {
        let repo = MockExperimentRepository::new();
        repo.create(test_experiment("test-1")).await.unwrap();

        let result = repo.create(test_experiment("test-1")).await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_mock_repository_list_filters() {
        let repo = MockExperimentRepository::new();

        for i in 1..=3 {
            repo.create(test_experiment(&format!("exp-{}", i)))
                .await
                .unwrap();
        }

        let mut running = repo
            .get(&ExperimentId::new("exp-2").unwrap())
            .await
            .unwrap()
            .unwrap();
        running.start().unwrap();
        repo.update(running).await.unwrap();

        let all = repo.list(&ExperimentQuery::new()).await.unwrap();
        assert_eq!(all.len(), 3);

        let drafts = repo
            .list(&ExperimentQuery::new().with_state(ExperimentState::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 2);

        let limited = repo
            .list(&ExperimentQuery::new().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_repository_failure_injection() {
        let repo = MockExperimentRepository::new().with_error();
        let result = repo.get(&ExperimentId::new("test-1").unwrap()).await;
        assert!(matches!(result, Err(DomainError::Storage { .. })));
    }
}
