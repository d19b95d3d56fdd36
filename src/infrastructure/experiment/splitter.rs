//! Traffic splitter
//!
//! Assigns subjects to variants. Stored assignments always win over any
//! freshly computed one, so a subject's variant never changes for the
//! lifetime of an experiment, even across strategy or percentage edits.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::domain::experiment::{
    AllocationContext, AssignmentRecord, AssignmentStore, Experiment, ExperimentId,
    ExperimentState, SplitStrategy, SubjectId, VariantId,
};
use crate::domain::error::DomainError;

use super::hashing::SubjectHasher;

/// Errors raised during variant allocation
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Experiment '{id}' is not accepting traffic (state: {state})")]
    ExperimentNotRunning { id: ExperimentId, state: ExperimentState },

    #[error("No variant matched bucket {bucket:.4} for experiment '{id}'")]
    NoVariantMatched { id: ExperimentId, bucket: f64 },

    #[error(transparent)]
    Storage(#[from] DomainError),
}

impl From<AllocationError> for DomainError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Storage(e) => e,
            e @ AllocationError::ExperimentNotRunning { .. } => DomainError::conflict(e.to_string()),
            e @ AllocationError::NoVariantMatched { .. } => DomainError::internal(e.to_string()),
        }
    }
}

/// Deterministic traffic splitter backed by an assignment store
#[derive(Debug)]
pub struct TrafficSplitter<A> {
    assignments: Arc<A>,
}

impl<A> TrafficSplitter<A>
where
    A: AssignmentStore,
{
    pub fn new(assignments: Arc<A>) -> Self {
        Self { assignments }
    }

    /// Allocate a variant for a subject
    ///
    /// Checks the store first so existing assignments are returned unchanged.
    /// New assignments are computed per the experiment's split strategy and
    /// persisted through an insert-if-absent, so concurrent first calls for
    /// the same subject converge on a single winner.
    pub async fn allocate(
        &self,
        experiment: &Experiment,
        subject_id: &SubjectId,
        context: &AllocationContext,
    ) -> Result<AssignmentRecord, AllocationError> {
        if !experiment.state().is_allocatable() {
            return Err(AllocationError::ExperimentNotRunning {
                id: experiment.id().clone(),
                state: experiment.state(),
            });
        }

        if let Some(existing) = self.assignments.get(experiment.id(), subject_id).await? {
            return Ok(existing);
        }

        let variant_id = self.pick_variant(experiment, subject_id, context)?;

        let record = AssignmentRecord::new(
            experiment.id().clone(),
            subject_id.clone(),
            variant_id,
        );

        // The stored record wins if another task inserted first
        let stored = self.assignments.get_or_insert(record).await?;

        debug!(
            experiment_id = %experiment.id(),
            subject_id = %subject_id,
            variant_id = %stored.variant_id,
            "Allocated variant"
        );

        Ok(stored)
    }

    fn pick_variant(
        &self,
        experiment: &Experiment,
        subject_id: &SubjectId,
        context: &AllocationContext,
    ) -> Result<VariantId, AllocationError> {
        let config = experiment.config();

        let bucket = match config.split_strategy() {
            SplitStrategy::SubjectHash => {
                SubjectHasher::bucket(config.id().as_str(), subject_id.as_str())
            }
            SplitStrategy::Geographic => {
                // Fall back to the subject hash when no region is known
                let key = context.region.as_deref().unwrap_or(subject_id.as_str());
                SubjectHasher::bucket(config.id().as_str(), key)
            }
            SplitStrategy::Random => rand::thread_rng().gen_range(0.0..100.0),
        };

        config
            .variant_for_bucket(bucket)
            .map(|v| v.id().clone())
            .ok_or(AllocationError::NoVariantMatched {
                id: config.id().clone(),
                bucket,
            })
    }
}
