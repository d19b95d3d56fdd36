use thiserror::Error;

/// Core domain errors
///
/// Used by repository traits and the service boundary for faults that are
/// not covered by the operation-specific error enums (configuration,
/// allocation, metric, analysis, transition).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Notification error: {message}")]
    Notification { message: String },
}

impl DomainError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }
}

impl From<crate::domain::experiment::ConfigError> for DomainError {
    fn from(err: crate::domain::experiment::ConfigError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<crate::domain::experiment::TransitionError> for DomainError {
    fn from(err: crate::domain::experiment::TransitionError) -> Self {
        Self::conflict(err.to_string())
    }
}

impl From<crate::domain::experiment::MetricError> for DomainError {
    fn from(err: crate::domain::experiment::MetricError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<crate::domain::experiment::AnalysisError> for DomainError {
    fn from(err: crate::domain::experiment::AnalysisError) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let error = DomainError::not_found("Experiment 'test-id' not found");
        assert_eq!(
            error.to_string(),
            "Not found: Experiment 'test-id' not found"
        );
    }

    #[test]
    fn test_conflict_error() {
        let error = DomainError::conflict("Experiment already exists");
        assert_eq!(error.to_string(), "Conflict: Experiment already exists");
    }

    #[test]
    fn test_storage_error() {
        let error = DomainError::storage("write failed");
        assert_eq!(error.to_string(), "Storage error: write failed");
    }
}
