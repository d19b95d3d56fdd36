//! In-memory assignment store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::error::DomainError;
use crate::domain::experiment::{
    AssignmentRecord, AssignmentStore, ExperimentId, SubjectId, VariantId,
};

type AssignmentKey = (ExperimentId, SubjectId);

/// Thread-safe in-memory assignment store
///
/// `get_or_insert` runs under a single write lock, so concurrent first
/// assignments for the same subject resolve to exactly one stored record.
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    assignments: RwLock<HashMap<AssignmentKey, AssignmentRecord>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn get(
        &self,
        experiment_id: &ExperimentId,
        subject_id: &SubjectId,
    ) -> Result<Option<AssignmentRecord>, DomainError> {
        let assignments = self
            .assignments
            .read()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        Ok(assignments
            .get(&(experiment_id.clone(), subject_id.clone()))
            .cloned())
    }

    async fn get_or_insert(
        &self,
        record: AssignmentRecord,
    ) -> Result<AssignmentRecord, DomainError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        let key = (record.experiment_id.clone(), record.subject_id.clone());
        let stored = assignments.entry(key).or_insert_with(|| {
            debug!(
                experiment_id = %record.experiment_id,
                subject_id = %record.subject_id,
                variant_id = %record.variant_id,
                "Stored assignment"
            );
            record
        });

        Ok(stored.clone())
    }

    async fn count_by_variant(
        &self,
        experiment_id: &ExperimentId,
    ) -> Result<Vec<(VariantId, u64)>, DomainError> {
        let assignments = self
            .assignments
            .read()
            .map_err(|e| DomainError::internal(format!("Lock poisoned: {e}")))?;

        let mut counts: HashMap<VariantId, u64> = HashMap::new();
        for ((exp_id, _), record) in assignments.iter() {
            if exp_id == experiment_id {
                *counts.entry(record.variant_id.clone()).or_default() += 1;
            }
        }

        let mut counts: Vec<(VariantId, u64)> = counts.into_iter().collect();
        counts.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(experiment: &str, subject: &str, variant: &str) -> AssignmentRecord {
        AssignmentRecord::new(
            ExperimentId::new(experiment).unwrap(),
            SubjectId::new(subject).unwrap(),
            VariantId::new(variant).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_insert_wins() {
        let store = InMemoryAssignmentStore::new();

        let first = store
            .get_or_insert(record("exp-1", "user-1", "control"))
            .await
            .unwrap();
        assert_eq!(first.variant_id.as_str(), "control");

        // A later insert for the same key returns the stored winner
        let second = store
            .get_or_insert(record("exp-1", "user-1", "treatment"))
            .await
            .unwrap();
        assert_eq!(second.variant_id.as_str(), "control");
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryAssignmentStore::new();
        let found = store
            .get(
                &ExperimentId::new("exp-1").unwrap(),
                &SubjectId::new("user-1").unwrap(),
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_per_experiment() {
        let store = InMemoryAssignmentStore::new();
        store
            .get_or_insert(record("exp-1", "user-1", "control"))
            .await
            .unwrap();
        store
            .get_or_insert(record("exp-2", "user-1", "treatment"))
            .await
            .unwrap();

        let exp1 = store
            .get(
                &ExperimentId::new("exp-1").unwrap(),
                &SubjectId::new("user-1").unwrap(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exp1.variant_id.as_str(), "control");
    }

    #[tokio::test]
    async fn test_count_by_variant() {
        let store = InMemoryAssignmentStore::new();
        for i in 0..3 {
            store
                .get_or_insert(record("exp-1", &format!("user-{i}"), "control"))
                .await
                .unwrap();
        }
        store
            .get_or_insert(record("exp-1", "user-x", "treatment"))
            .await
            .unwrap();
        store
            .get_or_insert(record("exp-2", "user-y", "treatment"))
            .await
            .unwrap();

        let counts = store
            .count_by_variant(&ExperimentId::new("exp-1").unwrap())
            .await
            .unwrap();

        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0], (VariantId::new("control").unwrap(), 3));
        assert_eq!(counts[1], (VariantId::new("treatment").unwrap(), 1));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_converge() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryAssignmentStore::new());
        let variants = ["control", "treatment"];

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let variant = variants[i % 2];
                tokio::spawn(async move {
                    store
                        .get_or_insert(record("exp-1", "user-1", variant))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = std::collections::HashSet::new();
        for handle in handles {
            winners.insert(handle.await.unwrap().variant_id);
        }

        assert_eq!(winners.len(), 1);
    }
}
