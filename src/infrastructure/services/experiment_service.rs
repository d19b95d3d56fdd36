//! Experiment service
//!
//! Business logic for the experiment lifecycle: registration, traffic
//! allocation, metric ingestion, analysis, periodic evaluation, and
//! promotion. Generic over the repository traits so tests can inject
//! in-memory or failing implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, PromotionPolicy};
use crate::domain::DomainError;
use crate::domain::experiment::{
    AllocationContext, AnalysisResult, AssignmentRecord, AssignmentStore, Experiment,
    ExperimentConfig, ExperimentId, ExperimentQuery, ExperimentRepository, ExperimentState,
    ConfigError, ExperimentStatusReport, FailedCriterion, MetricError, MetricRepository,
    MetricSample, PromotionDecision, SubjectId, TestKind, VariantId, VariantStatus,
    validate_config,
};
use crate::infrastructure::experiment::{StatisticalAnalyzer, TrafficSplitter};
use crate::infrastructure::notification::{ExperimentEvent, Notifier};

/// Outcome of evaluating one experiment in a sweep
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub experiment_id: ExperimentId,
    /// State the experiment moved to, if the sweep transitioned it
    pub new_state: Option<ExperimentState>,
    /// Failure that prevented evaluation, if any
    pub error: Option<String>,
}

/// Service coordinating registry, splitter, aggregator, analyzer, and lifecycle
#[derive(Debug)]
pub struct ExperimentService<R, A, M>
where
    R: ExperimentRepository,
    A: AssignmentStore,
    M: MetricRepository,
{
    repository: Arc<R>,
    metrics: Arc<M>,
    splitter: TrafficSplitter<A>,
    analyzer: StatisticalAnalyzer,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    // Serializes lifecycle transitions per experiment
    transition_locks: Mutex<HashMap<ExperimentId, Arc<Mutex<()>>>>,
}

impl<R, A, M> ExperimentService<R, A, M>
where
    R: ExperimentRepository,
    A: AssignmentStore,
    M: MetricRepository,
{
    pub fn new(
        repository: Arc<R>,
        assignments: Arc<A>,
        metrics: Arc<M>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            metrics,
            splitter: TrafficSplitter::new(assignments),
            analyzer: StatisticalAnalyzer::new(),
            notifier,
            config,
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Register an experiment
    ///
    /// Validates the configuration and creates the experiment in `Draft`.
    /// Re-registering an identical configuration is idempotent; registering
    /// a different configuration under an existing id is a conflict.
    pub async fn register(&self, config: ExperimentConfig) -> Result<Experiment, DomainError> {
        validate_config(&config, self.config.engine.min_sample_floor)?;

        if let Some(existing) = self.repository.get(config.id()).await? {
            if existing.config() == &config {
                debug!(experiment_id = %config.id(), "Idempotent re-registration");
                return Ok(existing);
            }
            return Err(DomainError::conflict(
                ConfigError::DuplicateId(config.id().to_string()).to_string(),
            ));
        }

        let experiment = self.repository.create(Experiment::new(config)).await?;
        info!(experiment_id = %experiment.id(), "Registered experiment");
        Ok(experiment)
    }

    /// Get an experiment by id
    pub async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        self.repository.get(id).await
    }

    /// List experiments with optional filters
    pub async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
        self.repository.list(query).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start an experiment (Draft -> Running)
    pub async fn start(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        let lock = self.transition_lock(id).await;
        let _guard = lock.lock().await;

        let mut experiment = self.require(id).await?;
        experiment.start()?;
        let experiment = self.repository.update(experiment).await?;

        info!(experiment_id = %id, "Started experiment");
        self.notify_best_effort(ExperimentEvent::Started {
            experiment_id: id.clone(),
        })
        .await;

        Ok(experiment)
    }

    /// Stop a monitoring experiment early (Monitoring -> Completed)
    pub async fn stop(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        let lock = self.transition_lock(id).await;
        let _guard = lock.lock().await;

        let mut experiment = self.require(id).await?;
        experiment.complete()?;
        let experiment = self.repository.update(experiment).await?;

        info!(experiment_id = %id, "Completed experiment (manual stop)");
        let results = self
            .analysis_or_empty(&experiment, TestKind::WelchT)
            .await;
        self.notify_best_effort(ExperimentEvent::Completed {
            experiment_id: id.clone(),
            results,
        })
        .await;

        Ok(experiment)
    }

    /// Abort an experiment from any non-terminal state
    pub async fn abort(
        &self,
        id: &ExperimentId,
        reason: Option<String>,
    ) -> Result<Experiment, DomainError> {
        let lock = self.transition_lock(id).await;
        let _guard = lock.lock().await;

        let mut experiment = self.require(id).await?;
        experiment.abort()?;
        let experiment = self.repository.update(experiment).await?;

        info!(experiment_id = %id, ?reason, "Aborted experiment");
        self.notify_best_effort(ExperimentEvent::Aborted {
            experiment_id: id.clone(),
            reason,
        })
        .await;

        Ok(experiment)
    }

    // ========================================================================
    // Hot path
    // ========================================================================

    /// Allocate a variant for a subject
    pub async fn allocate_variant(
        &self,
        id: &ExperimentId,
        subject_id: &SubjectId,
        context: &AllocationContext,
    ) -> Result<AssignmentRecord, DomainError> {
        let experiment = self.require(id).await?;
        Ok(self
            .splitter
            .allocate(&experiment, subject_id, context)
            .await?)
    }

    /// Record one metric observation for a variant
    ///
    /// Accepted only while the experiment is taking traffic, for declared
    /// metrics, and for finite values.
    pub async fn record_metric(
        &self,
        id: &ExperimentId,
        variant_id: &VariantId,
        metric_name: &str,
        value: f64,
    ) -> Result<(), DomainError> {
        let experiment = self.require(id).await?;

        if !experiment.state().is_allocatable() {
            return Err(DomainError::conflict(format!(
                "Experiment '{id}' is not accepting metrics (state: {})",
                experiment.state()
            )));
        }

        if experiment.config().variant(variant_id).is_none() {
            return Err(DomainError::validation(format!(
                "Unknown variant '{variant_id}' for experiment '{id}'"
            )));
        }

        if !experiment.config().declares_metric(metric_name) {
            return Err(MetricError::UnknownMetric(metric_name.to_string()).into());
        }
        if !value.is_finite() {
            return Err(MetricError::NotFinite(value).into());
        }

        self.metrics
            .append(MetricSample::new(
                id.clone(),
                variant_id.clone(),
                metric_name,
                value,
            ))
            .await
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Analyze every treatment variant against the control on all declared metrics
    pub async fn get_analysis(
        &self,
        id: &ExperimentId,
        test: TestKind,
    ) -> Result<Vec<AnalysisResult>, DomainError> {
        let experiment = self.require(id).await?;
        let snapshot = self.metrics.snapshot(experiment.config()).await?;
        Ok(self.analyzer.analyze(experiment.config(), &snapshot, test)?)
    }

    /// Point-in-time status: per-variant primary-metric sample counts and elapsed time
    pub async fn get_status(
        &self,
        id: &ExperimentId,
    ) -> Result<ExperimentStatusReport, DomainError> {
        let experiment = self.require(id).await?;
        let config = experiment.config();

        let mut variants = Vec::with_capacity(config.variants().len());
        let mut total = 0;
        for variant in config.variants() {
            let summary = self
                .metrics
                .summarize(id, variant.id(), config.primary_metric())
                .await?;
            total += summary.sample_size;
            variants.push(VariantStatus {
                variant_id: variant.id().clone(),
                is_control: variant.is_control(),
                primary_metric_samples: summary.sample_size,
            });
        }

        let elapsed_hours = experiment
            .started_at()
            .map(|started| (Utc::now() - started).num_seconds() as f64 / 3600.0);

        Ok(ExperimentStatusReport {
            experiment_id: id.clone(),
            name: config.name().to_string(),
            state: experiment.state(),
            elapsed_hours,
            variants,
            total_primary_samples: total,
        })
    }

    // ========================================================================
    // Evaluation sweep
    // ========================================================================

    /// Evaluate every Running and Monitoring experiment once
    ///
    /// Applies the automatic transitions: Running -> Monitoring when every
    /// variant reaches the experiment's minimum sample size on the primary
    /// metric, and Monitoring -> Completed on max duration or early stopping.
    /// One experiment's failure never blocks the rest of the sweep.
    pub async fn evaluate(&self) -> Result<Vec<EvaluationOutcome>, DomainError> {
        let mut candidates = self
            .repository
            .list(&ExperimentQuery::new().with_state(ExperimentState::Running))
            .await?;
        candidates.extend(
            self.repository
                .list(&ExperimentQuery::new().with_state(ExperimentState::Monitoring))
                .await?,
        );

        let mut outcomes = Vec::with_capacity(candidates.len());
        for experiment in candidates {
            let id = experiment.id().clone();
            let outcome = match self.evaluate_one(&id).await {
                Ok(new_state) => EvaluationOutcome {
                    experiment_id: id,
                    new_state,
                    error: None,
                },
                Err(e) => {
                    warn!(experiment_id = %id, error = %e, "Evaluation failed");
                    EvaluationOutcome {
                        experiment_id: id,
                        new_state: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn evaluate_one(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<ExperimentState>, DomainError> {
        let lock = self.transition_lock(id).await;
        let _guard = lock.lock().await;

        let mut experiment = self.require(id).await?;

        match experiment.state() {
            ExperimentState::Running => {
                if !self.all_variants_at_minimum(&experiment).await? {
                    return Ok(None);
                }

                experiment.begin_monitoring()?;
                self.repository.update(experiment).await?;
                info!(experiment_id = %id, "Experiment reached minimum sample size, monitoring");
                self.notify_best_effort(ExperimentEvent::MonitoringStarted {
                    experiment_id: id.clone(),
                })
                .await;
                Ok(Some(ExperimentState::Monitoring))
            }
            ExperimentState::Monitoring => {
                let expired = experiment.max_duration_exceeded(Utc::now());
                let early_stop = if !expired && experiment.config().early_stopping() {
                    self.early_stopping_triggered(&experiment).await?
                } else {
                    false
                };

                if !expired && !early_stop {
                    return Ok(None);
                }

                experiment.complete()?;
                let experiment = self.repository.update(experiment).await?;
                info!(
                    experiment_id = %id,
                    expired,
                    early_stop,
                    "Experiment completed"
                );

                let results = self
                    .analysis_or_empty(&experiment, TestKind::WelchT)
                    .await;
                self.notify_best_effort(ExperimentEvent::Completed {
                    experiment_id: id.clone(),
                    results,
                })
                .await;
                Ok(Some(ExperimentState::Completed))
            }
            _ => Ok(None),
        }
    }

    async fn all_variants_at_minimum(&self, experiment: &Experiment) -> Result<bool, DomainError> {
        let config = experiment.config();
        for variant in config.variants() {
            let summary = self
                .metrics
                .summarize(experiment.id(), variant.id(), config.primary_metric())
                .await?;
            if summary.sample_size < config.minimum_sample_size() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn early_stopping_triggered(
        &self,
        experiment: &Experiment,
    ) -> Result<bool, DomainError> {
        let snapshot = self.metrics.snapshot(experiment.config()).await?;
        let results =
            self.analyzer
                .analyze_primary(experiment.config(), &snapshot, TestKind::WelchT)?;

        Ok(results.iter().any(|r| r.is_significant))
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    /// Request promotion of a treatment variant (Completed -> Promoted)
    ///
    /// All policy criteria must pass; a refusal enumerates every failed
    /// criterion. The state change commits only after the notifier confirms
    /// delivery within the configured timeout, so a timed-out notification
    /// leaves the experiment in `Completed`.
    pub async fn request_promotion(
        &self,
        id: &ExperimentId,
        variant_id: &VariantId,
    ) -> Result<PromotionDecision, DomainError> {
        let lock = self.transition_lock(id).await;
        let _guard = lock.lock().await;

        let mut experiment = self.require(id).await?;

        let variant = experiment
            .config()
            .variant(variant_id)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "Unknown variant '{variant_id}' for experiment '{id}'"
                ))
            })?;
        if variant.is_control() {
            return Err(DomainError::validation(format!(
                "Variant '{variant_id}' is the control and cannot be promoted"
            )));
        }

        if !experiment
            .state()
            .can_transition_to(ExperimentState::Promoted)
        {
            return Err(DomainError::conflict(format!(
                "Experiment '{id}' cannot be promoted from state {}",
                experiment.state()
            )));
        }

        let snapshot = self.metrics.snapshot(experiment.config()).await?;
        let results = self.analyzer.analyze_primary(
            experiment.config(),
            &snapshot,
            TestKind::WelchT,
        )?;
        let result = results
            .iter()
            .find(|r| &r.treatment_variant_id == variant_id)
            .ok_or_else(|| {
                DomainError::internal(format!(
                    "No analysis result for variant '{variant_id}'"
                ))
            })?;

        let failed = check_promotion_criteria(result, &self.config.promotion);
        if !failed.is_empty() {
            info!(
                experiment_id = %id,
                variant_id = %variant_id,
                failed = failed.len(),
                "Promotion refused"
            );
            return Ok(PromotionDecision::Refused {
                variant_id: variant_id.clone(),
                failed,
            });
        }

        // Commit point: notification must land before the state change persists
        experiment.promote()?;
        self.notify_committed(ExperimentEvent::Promoted {
            experiment_id: id.clone(),
            variant_id: variant_id.clone(),
        })
        .await?;
        self.repository.update(experiment).await?;

        info!(experiment_id = %id, variant_id = %variant_id, "Promoted variant");
        Ok(PromotionDecision::Promoted {
            variant_id: variant_id.clone(),
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn require(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Experiment '{id}' not found")))
    }

    async fn transition_lock(&self, id: &ExperimentId) -> Arc<Mutex<()>> {
        let mut locks = self.transition_locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    async fn analysis_or_empty(
        &self,
        experiment: &Experiment,
        test: TestKind,
    ) -> Vec<AnalysisResult> {
        match self.metrics.snapshot(experiment.config()).await {
            Ok(snapshot) => self
                .analyzer
                .analyze(experiment.config(), &snapshot, test)
                .unwrap_or_default(),
            Err(e) => {
                warn!(experiment_id = %experiment.id(), error = %e, "Snapshot failed for notification");
                Vec::new()
            }
        }
    }

    /// Deliver an event, logging failures without propagating them
    async fn notify_best_effort(&self, event: ExperimentEvent) {
        if let Err(e) = self.notify_committed(event).await {
            warn!(error = %e, "Notification failed");
        }
    }

    /// Deliver an event within the configured timeout, propagating failures
    async fn notify_committed(&self, event: ExperimentEvent) -> Result<(), DomainError> {
        let timeout = Duration::from_secs(self.config.engine.notification_timeout_secs);
        match tokio::time::timeout(timeout, self.notifier.notify(event)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::notification(format!(
                "Notifier timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

/// Check every promotion criterion, returning all that failed
fn check_promotion_criteria(
    result: &AnalysisResult,
    policy: &PromotionPolicy,
) -> Vec<FailedCriterion> {
    let mut failed = Vec::new();

    if !result.is_significant {
        failed.push(FailedCriterion::NotSignificant {
            p_value: result.p_value,
        });
    }

    // NaN improvement (zero control mean) never clears the threshold
    if !(result.relative_improvement >= policy.min_relative_improvement) {
        failed.push(FailedCriterion::MinimumImprovement {
            required: policy.min_relative_improvement,
            achieved: result.relative_improvement,
        });
    }

    if result.treatment_sample_size < policy.min_sample_size {
        failed.push(FailedCriterion::MinimumSampleSize {
            required: policy.min_sample_size,
            achieved: result.treatment_sample_size,
        });
    }

    let confidence = result.achieved_confidence();
    if confidence < policy.min_confidence {
        failed.push(FailedCriterion::MinimumConfidence {
            required: policy.min_confidence,
            achieved: confidence,
        });
    }

    failed
}
