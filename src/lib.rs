//! AB Engine
//!
//! An online experimentation and statistical decision engine:
//! - Experiment registry with strict configuration validation
//! - Deterministic traffic splitting with durable assignments
//! - Streaming metric aggregation (constant memory per stream)
//! - Welch's t-test, Mann-Whitney U, and bootstrap analysis
//! - Lifecycle state machine with policy-gated auto-promotion

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::EngineConfig;

use std::sync::Arc;

use infrastructure::experiment::{
    InMemoryAssignmentStore, InMemoryExperimentRepository, InMemoryMetricRepository,
};
use infrastructure::notification::TracingNotifier;
use infrastructure::services::ExperimentService;

/// Service wired with the in-memory backends
pub type InMemoryExperimentService = ExperimentService<
    InMemoryExperimentRepository,
    InMemoryAssignmentStore,
    InMemoryMetricRepository,
>;

/// Build an engine backed by in-memory stores and a tracing notifier
pub fn build_engine(config: EngineConfig) -> InMemoryExperimentService {
    let metrics = Arc::new(InMemoryMetricRepository::with_reservoir_capacity(
        config.engine.reservoir_capacity,
    ));

    ExperimentService::new(
        Arc::new(InMemoryExperimentRepository::new()),
        Arc::new(InMemoryAssignmentStore::new()),
        metrics,
        Arc::new(TracingNotifier::new()),
        config,
    )
}
