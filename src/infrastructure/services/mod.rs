mod experiment_service;

pub use experiment_service::{EvaluationOutcome, ExperimentService};
