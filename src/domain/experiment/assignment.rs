//! Assignment records tying subjects to variants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, SubjectId, VariantId};

/// A durable record of a subject's variant assignment
///
/// Produced once per (experiment, subject) pair and stable for the lifetime
/// of the experiment: the store's insert-if-absent semantics make the first
/// persisted record authoritative, even under concurrent first-time requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub experiment_id: ExperimentId,
    pub subject_id: SubjectId,
    pub variant_id: VariantId,
    pub assigned_at: DateTime<Utc>,
}

impl AssignmentRecord {
    /// Create a new assignment record timestamped now
    pub fn new(experiment_id: ExperimentId, subject_id: SubjectId, variant_id: VariantId) -> Self {
        Self {
            experiment_id,
            subject_id,
            variant_id,
            assigned_at: Utc::now(),
        }
    }
}

/// Context for an allocation request
///
/// Carries optional subject attributes used by non-default split strategies.
#[derive(Debug, Clone, Default)]
pub struct AllocationContext {
    /// Geographic region of the subject, used by the geographic strategy
    pub region: Option<String>,
}

impl AllocationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject's region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = AssignmentRecord::new(
            ExperimentId::new("exp-1").unwrap(),
            SubjectId::new("user-1").unwrap(),
            VariantId::new("control").unwrap(),
        );

        assert_eq!(record.experiment_id.as_str(), "exp-1");
        assert_eq!(record.subject_id.as_str(), "user-1");
        assert_eq!(record.variant_id.as_str(), "control");
    }

    #[test]
    fn test_record_serialization() {
        let record = AssignmentRecord::new(
            ExperimentId::new("exp-1").unwrap(),
            SubjectId::new("user-1").unwrap(),
            VariantId::new("control").unwrap(),
        );

        let json = serde_json::to_string(&record).unwrap();
        let parsed: AssignmentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_allocation_context() {
        let ctx = AllocationContext::new().with_region("eu-west");
        assert_eq!(ctx.region.as_deref(), Some("eu-west"));
        assert!(AllocationContext::new().region.is_none());
    }
}
