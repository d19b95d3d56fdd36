//! Lifecycle notifications
//!
//! The engine emits an event on every externally interesting transition.
//! Delivery is best-effort for most events: a slow or failing notifier is
//! logged and never fails the operation that triggered it. Promotion is the
//! exception: its state change commits only after delivery succeeds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::info;

use crate::domain::error::DomainError;
use crate::domain::experiment::{AnalysisResult, ExperimentId, VariantId};

/// Event describing a lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExperimentEvent {
    Started {
        experiment_id: ExperimentId,
    },
    MonitoringStarted {
        experiment_id: ExperimentId,
    },
    Completed {
        experiment_id: ExperimentId,
        results: Vec<AnalysisResult>,
    },
    Promoted {
        experiment_id: ExperimentId,
        variant_id: VariantId,
    },
    Aborted {
        experiment_id: ExperimentId,
        reason: Option<String>,
    },
}

impl ExperimentEvent {
    /// The experiment this event belongs to
    pub fn experiment_id(&self) -> &ExperimentId {
        match self {
            Self::Started { experiment_id }
            | Self::MonitoringStarted { experiment_id }
            | Self::Completed { experiment_id, .. }
            | Self::Promoted { experiment_id, .. }
            | Self::Aborted { experiment_id, .. } => experiment_id,
        }
    }
}

/// Receives lifecycle events
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify(&self, event: ExperimentEvent) -> Result<(), DomainError>;
}

/// Notifier that emits events as structured log lines
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: ExperimentEvent) -> Result<(), DomainError> {
        info!(
            experiment_id = %event.experiment_id(),
            event = ?event,
            "Experiment event"
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock notifier recording every delivered event, with configurable
    /// failure and delay for timeout tests
    #[derive(Debug, Default)]
    pub struct MockNotifier {
        events: Mutex<Vec<ExperimentEvent>>,
        should_fail: bool,
        delay: Option<Duration>,
    }

    impl MockNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_error(mut self) -> Self {
            self.should_fail = true;
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn events(&self) -> Vec<ExperimentEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, event: ExperimentEvent) -> Result<(), DomainError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if self.should_fail {
                return Err(DomainError::notification("Mock notifier failure"));
            }

            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
            Ok(())
        }
    }
}
