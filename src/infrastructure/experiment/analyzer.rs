//! Statistical analyzer for experiment data
//!
//! Pure computation: takes an experiment config and a metrics snapshot and
//! produces one [`AnalysisResult`] per (treatment variant, metric) pair
//! against the control. Holds no state and touches no storage.

use tracing::debug;

use crate::domain::experiment::{
    AnalysisError, AnalysisResult, ConfidenceInterval, ExperimentConfig, MetricsSnapshot,
    ModelVariant, TestKind, VariantMetricSummary, relative_improvement,
};

use super::statistical::{
    BOOTSTRAP_ITERATIONS, SampleMoments, TestOutcome, bootstrap_mean_diff, mann_whitney_u,
    welch_confidence_interval, welch_t_test,
};

/// Runs two-sample comparisons for every treatment variant and metric
#[derive(Debug, Clone, Default)]
pub struct StatisticalAnalyzer;

impl StatisticalAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a snapshot against the experiment's declared metrics
    ///
    /// Results come back in variant declaration order, primary metric first
    /// and then secondary metrics in declaration order. Comparisons where
    /// either side is below the experiment's minimum sample size are marked
    /// `insufficient_data` and are never significant.
    pub fn analyze(
        &self,
        config: &ExperimentConfig,
        snapshot: &MetricsSnapshot,
        test: TestKind,
    ) -> Result<Vec<AnalysisResult>, AnalysisError> {
        let control = config
            .control_variant()
            .ok_or(AnalysisError::MissingControlVariant)?;

        let metrics: Vec<&str> = std::iter::once(config.primary_metric())
            .chain(config.secondary_metrics().iter().map(String::as_str))
            .collect();

        let mut results = Vec::new();

        for treatment in config.variants().iter().filter(|v| !v.is_control()) {
            for metric in &metrics {
                results.push(self.compare(config, control, treatment, metric, snapshot, test));
            }
        }

        debug!(
            experiment_id = %config.id(),
            results = results.len(),
            ?test,
            "Analyzed experiment snapshot"
        );

        Ok(results)
    }

    /// Analyze the primary metric only
    pub fn analyze_primary(
        &self,
        config: &ExperimentConfig,
        snapshot: &MetricsSnapshot,
        test: TestKind,
    ) -> Result<Vec<AnalysisResult>, AnalysisError> {
        let control = config
            .control_variant()
            .ok_or(AnalysisError::MissingControlVariant)?;

        Ok(config
            .variants()
            .iter()
            .filter(|v| !v.is_control())
            .map(|treatment| {
                self.compare(
                    config,
                    control,
                    treatment,
                    config.primary_metric(),
                    snapshot,
                    test,
                )
            })
            .collect())
    }

    fn compare(
        &self,
        config: &ExperimentConfig,
        control: &ModelVariant,
        treatment: &ModelVariant,
        metric: &str,
        snapshot: &MetricsSnapshot,
        test: TestKind,
    ) -> AnalysisResult {
        let empty_control;
        let control_summary = match snapshot.get(control.id(), metric) {
            Some(s) => s,
            None => {
                empty_control = VariantMetricSummary::empty(
                    config.id().clone(),
                    control.id().clone(),
                    metric,
                );
                &empty_control
            }
        };

        let empty_treatment;
        let treatment_summary = match snapshot.get(treatment.id(), metric) {
            Some(s) => s,
            None => {
                empty_treatment = VariantMetricSummary::empty(
                    config.id().clone(),
                    treatment.id().clone(),
                    metric,
                );
                &empty_treatment
            }
        };

        let insufficient_data = control_summary.sample_size < config.minimum_sample_size()
            || treatment_summary.sample_size < config.minimum_sample_size();

        let (outcome, interval) = self.run_test(
            control_summary,
            treatment_summary,
            test,
            config.confidence_level(),
        );

        let is_significant =
            !insufficient_data && outcome.p_value < config.significance_threshold();

        AnalysisResult {
            metric_name: metric.to_string(),
            control_variant_id: control.id().clone(),
            treatment_variant_id: treatment.id().clone(),
            test,
            test_statistic: outcome.statistic,
            p_value: outcome.p_value,
            relative_improvement: relative_improvement(
                control_summary.mean,
                treatment_summary.mean,
            ),
            confidence_interval: interval,
            control_mean: control_summary.mean,
            treatment_mean: treatment_summary.mean,
            control_sample_size: control_summary.sample_size,
            treatment_sample_size: treatment_summary.sample_size,
            insufficient_data,
            is_significant,
        }
    }

    /// Run the chosen test, falling back to an inconclusive outcome when the
    /// samples are too small for the test to be defined
    fn run_test(
        &self,
        control: &VariantMetricSummary,
        treatment: &VariantMetricSummary,
        test: TestKind,
        confidence_level: f64,
    ) -> (TestOutcome, ConfidenceInterval) {
        let control_moments =
            SampleMoments::new(control.mean, control.variance, control.sample_size);
        let treatment_moments =
            SampleMoments::new(treatment.mean, treatment.variance, treatment.sample_size);

        let moment_interval =
            welch_confidence_interval(&control_moments, &treatment_moments, confidence_level);

        let outcome = match test {
            TestKind::WelchT => welch_t_test(&control_moments, &treatment_moments),
            TestKind::MannWhitneyU => mann_whitney_u(&control.raw_values, &treatment.raw_values),
            TestKind::Bootstrap => {
                if let Some((outcome, interval)) = bootstrap_mean_diff(
                    &control.raw_values,
                    &treatment.raw_values,
                    confidence_level,
                    BOOTSTRAP_ITERATIONS,
                ) {
                    return (outcome, interval);
                }
                None
            }
        };

        let outcome = outcome.unwrap_or(TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        });

        (outcome, moment_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{ExperimentId, ModelRef, VariantId};

    fn two_variant_config() -> ExperimentConfig {
        ExperimentConfig::new(
            ExperimentId::new("exp-analyze").unwrap(),
            "Analyzer test",
            "accuracy",
        )
        .with_secondary_metric("latency_ms")
        .with_minimum_sample_size(100)
        .with_variant(
            ModelVariant::new(
                VariantId::new("control").unwrap(),
                ModelRef::new("model-a", "1.0"),
                50.0,
            )
            .with_control(true),
        )
        .with_variant(ModelVariant::new(
            VariantId::new("treatment").unwrap(),
            ModelRef::new("model-b", "1.0"),
            50.0,
        ))
    }

    fn summary(
        variant: &str,
        metric: &str,
        sample_size: u64,
        mean: f64,
        variance: f64,
    ) -> VariantMetricSummary {
        VariantMetricSummary {
            experiment_id: ExperimentId::new("exp-analyze").unwrap(),
            variant_id: VariantId::new(variant).unwrap(),
            metric_name: metric.to_string(),
            sample_size,
            mean,
            variance,
            std_dev: variance.sqrt(),
            raw_values: Vec::new(),
        }
    }

    #[test]
    fn test_missing_control_variant() {
        let config = ExperimentConfig::new(
            ExperimentId::new("exp-no-control").unwrap(),
            "No control",
            "accuracy",
        )
        .with_variant(ModelVariant::new(
            VariantId::new("a").unwrap(),
            ModelRef::new("model-a", "1.0"),
            100.0,
        ));

        let analyzer = StatisticalAnalyzer::new();
        let err = analyzer
            .analyze(&config, &MetricsSnapshot::new(), TestKind::WelchT)
            .unwrap_err();
        assert_eq!(err, AnalysisError::MissingControlVariant);
    }

    #[test]
    fn test_one_result_per_treatment_metric_pair() {
        let config = two_variant_config();
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert(summary("control", "accuracy", 500, 0.8, 0.01));
        snapshot.insert(summary("treatment", "accuracy", 500, 0.85, 0.01));
        snapshot.insert(summary("control", "latency_ms", 500, 120.0, 400.0));
        snapshot.insert(summary("treatment", "latency_ms", 500, 118.0, 400.0));

        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze(&config, &snapshot, TestKind::WelchT)
            .unwrap();

        // One treatment variant, two metrics, primary first
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metric_name, "accuracy");
        assert_eq!(results[1].metric_name, "latency_ms");
    }

    #[test]
    fn test_clear_improvement_is_significant() {
        let config = two_variant_config();
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert(summary("control", "accuracy", 2000, 0.80, 0.01));
        snapshot.insert(summary("treatment", "accuracy", 2000, 0.85, 0.01));

        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze_primary(&config, &snapshot, TestKind::WelchT)
            .unwrap();

        let r = &results[0];
        assert!(r.is_significant);
        assert!(!r.insufficient_data);
        assert!(r.p_value < 0.001);
        assert!((r.relative_improvement - 6.25).abs() < 0.01);
        assert!(r.confidence_interval.excludes_zero());
    }

    #[test]
    fn test_undersized_sample_is_insufficient_never_significant() {
        let config = two_variant_config();
        let mut snapshot = MetricsSnapshot::new();
        // Huge separation but below minimum_sample_size on the treatment side
        snapshot.insert(summary("control", "accuracy", 2000, 0.50, 0.001));
        snapshot.insert(summary("treatment", "accuracy", 20, 0.99, 0.001));

        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze_primary(&config, &snapshot, TestKind::WelchT)
            .unwrap();

        assert!(results[0].insufficient_data);
        assert!(!results[0].is_significant);
    }

    #[test]
    fn test_missing_summaries_are_inconclusive() {
        let config = two_variant_config();
        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze_primary(&config, &MetricsSnapshot::new(), TestKind::WelchT)
            .unwrap();

        let r = &results[0];
        assert!(r.insufficient_data);
        assert!(!r.is_significant);
        assert_eq!(r.p_value, 1.0);
        assert_eq!(r.control_sample_size, 0);
    }

    #[test]
    fn test_zero_control_mean_gives_nan_improvement() {
        let config = two_variant_config();
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert(summary("control", "accuracy", 500, 0.0, 0.0));
        snapshot.insert(summary("treatment", "accuracy", 500, 1.0, 0.1));

        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze_primary(&config, &snapshot, TestKind::WelchT)
            .unwrap();

        assert!(results[0].relative_improvement.is_nan());
    }

    #[test]
    fn test_mann_whitney_path_uses_raw_values() {
        let config = two_variant_config();
        let mut snapshot = MetricsSnapshot::new();

        let mut control = summary("control", "accuracy", 200, 2.0, 0.5);
        control.raw_values = (0..200).map(|i| 1.0 + (i % 3) as f64).collect();
        let mut treatment = summary("treatment", "accuracy", 200, 12.0, 0.5);
        treatment.raw_values = (0..200).map(|i| 11.0 + (i % 3) as f64).collect();

        snapshot.insert(control);
        snapshot.insert(treatment);

        let analyzer = StatisticalAnalyzer::new();
        let results = analyzer
            .analyze_primary(&config, &snapshot, TestKind::MannWhitneyU)
            .unwrap();

        assert_eq!(results[0].test, TestKind::MannWhitneyU);
        assert!(results[0].is_significant);
    }
}
