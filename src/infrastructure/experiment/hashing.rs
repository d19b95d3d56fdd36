//! Deterministic subject hashing for traffic allocation
//!
//! Ensures the same subject always lands in the same bucket for a given
//! experiment.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Granularity of the bucket space (1e-4 of a percent)
const BUCKET_SPACE: u64 = 1_000_000;

/// Deterministic hasher mapping (experiment, subject) onto [0, 100)
#[derive(Debug, Clone, Copy)]
pub struct SubjectHasher;

impl SubjectHasher {
    /// Compute a stable bucket value in [0, 100) for a subject key
    ///
    /// Identical (experiment_id, key) inputs always produce the same bucket;
    /// values are uniformly distributed so selection frequency converges to
    /// the configured traffic percentages across many subjects.
    pub fn bucket(experiment_id: &str, key: &str) -> f64 {
        let mut hasher = DefaultHasher::new();
        experiment_id.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % BUCKET_SPACE) as f64 * 100.0 / BUCKET_SPACE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_input_same_bucket() {
        let a = SubjectHasher::bucket("exp-1", "user-1");
        let b = SubjectHasher::bucket("exp-1", "user-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_bucket_range() {
        for i in 0..1000 {
            let bucket = SubjectHasher::bucket("exp-1", &format!("user-{}", i));
            assert!((0.0..100.0).contains(&bucket));
        }
    }

    #[test]
    fn test_different_experiments_decorrelated() {
        // The same subject should not systematically land in the same bucket
        // across experiments
        let mut moved = 0;
        for i in 0..100 {
            let key = format!("user-{}", i);
            let a = SubjectHasher::bucket("exp-1", &key);
            let b = SubjectHasher::bucket("exp-2", &key);
            if (a - b).abs() > 1.0 {
                moved += 1;
            }
        }
        assert!(moved > 50, "buckets too correlated across experiments: {moved}");
    }

    #[test]
    fn test_distribution() {
        let mut buckets = [0u32; 10];

        for i in 0..10_000 {
            let bucket = SubjectHasher::bucket("exp-1", &format!("user-{}", i));
            buckets[(bucket / 10.0) as usize] += 1;
        }

        // Each decile should hold roughly 1000 subjects
        for count in buckets {
            assert!(count > 800, "decile has too few subjects: {}", count);
            assert!(count < 1200, "decile has too many subjects: {}", count);
        }
    }

    #[test]
    fn test_determinism_across_calls() {
        let first = SubjectHasher::bucket("scoring-v2", "customer-12345");

        for _ in 0..100 {
            assert_eq!(SubjectHasher::bucket("scoring-v2", "customer-12345"), first);
        }
    }
}
