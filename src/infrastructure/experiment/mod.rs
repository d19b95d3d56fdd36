//! Experiment infrastructure: hashing, statistics, allocation, and in-memory stores

mod analyzer;
mod hashing;
mod in_memory_assignment_store;
mod in_memory_metric_repo;
mod in_memory_repository;
mod splitter;
pub mod statistical;

pub use analyzer::StatisticalAnalyzer;
pub use hashing::SubjectHasher;
pub use in_memory_assignment_store::InMemoryAssignmentStore;
pub use in_memory_metric_repo::InMemoryMetricRepository;
pub use in_memory_repository::InMemoryExperimentRepository;
pub use splitter::{AllocationError, TrafficSplitter};
