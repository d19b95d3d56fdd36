//! In-memory experiment repository

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::experiment::{
    Experiment, ExperimentId, ExperimentQuery, ExperimentRepository,
};

/// Thread-safe in-memory experiment store
#[derive(Debug, Default)]
pub struct InMemoryExperimentRepository {
    experiments: RwLock<HashMap<ExperimentId, Experiment>>,
}

impl InMemoryExperimentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn create(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        if experiments.contains_key(experiment.id()) {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' already exists",
                experiment.id()
            )));
        }

        debug!(experiment_id = %experiment.id(), "Created experiment");

        experiments.insert(experiment.id().clone(), experiment.clone());
        Ok(experiment)
    }

    async fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        Ok(experiments.get(id).cloned())
    }

    async fn update(&self, experiment: Experiment) -> Result<Experiment, DomainError> {
        let mut experiments = self
            .experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        if !experiments.contains_key(experiment.id()) {
            return Err(DomainError::not_found(format!(
                "Experiment '{}' not found",
                experiment.id()
            )));
        }

        experiments.insert(experiment.id().clone(), experiment.clone());
        Ok(experiment)
    }

    async fn list(&self, query: &ExperimentQuery) -> Result<Vec<Experiment>, DomainError> {
        let experiments = self
            .experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        let mut matching: Vec<Experiment> = experiments
            .values()
            .filter(|e| query.state.is_none_or(|s| e.state() == s))
            .cloned()
            .collect();

        // Newest first, per the trait contract
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let offset = query.offset.unwrap_or(0);
        let matching: Vec<Experiment> = match query.limit {
            Some(limit) => matching.into_iter().skip(offset).take(limit).collect(),
            None => matching.into_iter().skip(offset).collect(),
        };

        Ok(matching)
    }
}
