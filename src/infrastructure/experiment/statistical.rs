//! Statistical test functions for experiment analysis
//!
//! Provides Welch's t-test over aggregate moments, Mann-Whitney U over raw
//! samples, and bootstrap resampling, plus the normal-distribution helpers
//! they share.

use rand::Rng;

use crate::domain::experiment::ConfidenceInterval;

/// Number of resamples used by the bootstrap test
pub const BOOTSTRAP_ITERATIONS: usize = 2000;

/// Result of a two-sample test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

/// Aggregate moments of one sample, sufficient input for Welch's t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleMoments {
    pub mean: f64,
    pub variance: f64,
    pub n: u64,
}

impl SampleMoments {
    pub fn new(mean: f64, variance: f64, n: u64) -> Self {
        Self { mean, variance, n }
    }

    /// Compute moments from raw values
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            variance: variance(values),
            n: values.len() as u64,
        }
    }

    /// Standard error contribution (variance / n)
    fn se_term(&self) -> f64 {
        self.variance / self.n as f64
    }
}

/// Calculate mean of a sample
pub fn mean(sample: &[f64]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// Calculate variance of a sample (sample variance, n-1 denominator)
pub fn variance(sample: &[f64]) -> f64 {
    if sample.len() < 2 {
        return 0.0;
    }

    let m = mean(sample);
    let n = sample.len() as f64;
    sample.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Welch's t-test for two independent samples, from aggregate moments
///
/// Preferred over Student's t-test because variant sample sizes and
/// variances are not assumed equal. Returns `None` when either sample has
/// fewer than 2 observations.
///
/// Zero-variance edge cases are classified, never NaN: equal means give
/// p = 1.0 (no evidence), differing means give p = 0.0 (complete
/// separation).
pub fn welch_t_test(control: &SampleMoments, treatment: &SampleMoments) -> Option<TestOutcome> {
    if control.n < 2 || treatment.n < 2 {
        return None;
    }

    let se2 = control.se_term() + treatment.se_term();

    if se2 == 0.0 {
        return Some(if control.mean == treatment.mean {
            TestOutcome {
                statistic: 0.0,
                p_value: 1.0,
            }
        } else {
            TestOutcome {
                statistic: f64::INFINITY,
                p_value: 0.0,
            }
        });
    }

    let t = (treatment.mean - control.mean) / se2.sqrt();
    let df = welch_df(control, treatment);

    Some(TestOutcome {
        statistic: t,
        p_value: p_value_from_t(t.abs(), df),
    })
}

/// Welch-Satterthwaite degrees of freedom
///
/// Callers must rule out the all-zero-variance case first.
fn welch_df(control: &SampleMoments, treatment: &SampleMoments) -> f64 {
    let se2 = control.se_term() + treatment.se_term();
    let denom = control.se_term().powi(2) / (control.n - 1) as f64
        + treatment.se_term().powi(2) / (treatment.n - 1) as f64;
    se2.powi(2) / denom
}

/// Mann-Whitney U test (rank-based, two-tailed, normal approximation)
///
/// Distribution-free alternative for metrics known to be non-normal. Uses
/// average ranks for ties and applies the tie correction to the variance.
/// Returns `None` when either sample has fewer than 2 observations.
pub fn mann_whitney_u(sample1: &[f64], sample2: &[f64]) -> Option<TestOutcome> {
    let n1 = sample1.len();
    let n2 = sample2.len();

    if n1 < 2 || n2 < 2 {
        return None;
    }

    // Rank the pooled samples, averaging ranks within tie groups
    let mut pooled: Vec<(f64, usize)> = sample1
        .iter()
        .map(|&v| (v, 0))
        .chain(sample2.iter().map(|&v| (v, 1)))
        .collect();
    pooled.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total = pooled.len();
    let mut ranks = vec![0.0f64; total];
    let mut tie_term = 0.0f64;

    let mut i = 0;
    while i < total {
        let mut j = i;
        while j + 1 < total && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }

        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for slot in ranks.iter_mut().take(j + 1).skip(i) {
            *slot = avg_rank;
        }

        let ties = (j - i + 1) as f64;
        tie_term += ties.powi(3) - ties;

        i = j + 1;
    }

    let rank_sum1: f64 = pooled
        .iter()
        .zip(&ranks)
        .filter(|((_, group), _)| *group == 0)
        .map(|(_, r)| r)
        .sum();

    let n1f = n1 as f64;
    let n2f = n2 as f64;
    let nf = total as f64;

    let u1 = rank_sum1 - n1f * (n1f + 1.0) / 2.0;
    let mu = n1f * n2f / 2.0;

    let variance_u =
        n1f * n2f / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)));

    if variance_u <= 0.0 {
        // All pooled values identical
        return Some(TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        });
    }

    let z = (u1 - mu) / variance_u.sqrt();

    Some(TestOutcome {
        statistic: z,
        p_value: 2.0 * (1.0 - normal_cdf(z.abs())),
    })
}

/// Bootstrap test and confidence interval for the difference of means
///
/// Resamples both groups with replacement and inspects the distribution of
/// the resampled mean difference (treatment - control). The p-value is the
/// two-tailed fraction of resamples on the far side of zero; the interval
/// is the percentile interval at `level`. Higher-robustness path when
/// moment assumptions are in doubt. Returns `None` when either sample has
/// fewer than 2 observations.
pub fn bootstrap_mean_diff(
    control: &[f64],
    treatment: &[f64],
    level: f64,
    iterations: usize,
) -> Option<(TestOutcome, ConfidenceInterval)> {
    if control.len() < 2 || treatment.len() < 2 || iterations == 0 {
        return None;
    }

    let mut rng = rand::thread_rng();
    let mut diffs = Vec::with_capacity(iterations);

    for _ in 0..iterations {
        let c_mean = resampled_mean(control, &mut rng);
        let t_mean = resampled_mean(treatment, &mut rng);
        diffs.push(t_mean - c_mean);
    }

    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let observed = mean(treatment) - mean(control);
    let below = diffs.iter().filter(|&&d| d <= 0.0).count() as f64;
    let above = diffs.iter().filter(|&&d| d >= 0.0).count() as f64;
    let nf = iterations as f64;

    // +1 smoothing keeps the p-value away from exactly 0
    let p_value = (2.0 * ((below + 1.0) / (nf + 1.0)).min((above + 1.0) / (nf + 1.0))).min(1.0);

    let se = variance(&diffs).sqrt();
    let statistic = if se > 0.0 { observed / se } else { 0.0 };

    let alpha = 1.0 - level;
    let lower = percentile(&diffs, alpha / 2.0);
    let upper = percentile(&diffs, 1.0 - alpha / 2.0);

    Some((
        TestOutcome { statistic, p_value },
        ConfidenceInterval {
            lower,
            upper,
            level,
        },
    ))
}

fn resampled_mean(sample: &[f64], rng: &mut impl Rng) -> f64 {
    let n = sample.len();
    let sum: f64 = (0..n).map(|_| sample[rng.gen_range(0..n)]).sum();
    sum / n as f64
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Confidence interval on the mean difference from aggregate moments
///
/// Normal-approximation interval at `level` around (treatment - control).
pub fn welch_confidence_interval(
    control: &SampleMoments,
    treatment: &SampleMoments,
    level: f64,
) -> ConfidenceInterval {
    let diff = treatment.mean - control.mean;

    if control.n < 2 || treatment.n < 2 {
        return ConfidenceInterval {
            lower: diff,
            upper: diff,
            level,
        };
    }

    let se2 = control.se_term() + treatment.se_term();
    if se2 == 0.0 {
        return ConfidenceInterval {
            lower: diff,
            upper: diff,
            level,
        };
    }

    let se = se2.sqrt();
    let mut z = inverse_normal_cdf(1.0 - (1.0 - level) / 2.0);

    // Widen for small samples so the interval agrees with p_value_from_t
    let df = welch_df(control, treatment);
    if df <= 30.0 {
        z /= (1.0 - 1.0 / (4.0 * df)).sqrt();
    }

    ConfidenceInterval {
        lower: diff - z * se,
        upper: diff + z * se,
        level,
    }
}

/// Approximate p-value from t-statistic and degrees of freedom
///
/// Uses the normal approximation for large df, with a correction factor for
/// smaller df.
fn p_value_from_t(t: f64, df: f64) -> f64 {
    // Two-tailed p-value
    if df > 30.0 {
        2.0 * (1.0 - normal_cdf(t))
    } else {
        let correction = 1.0 - 1.0 / (4.0 * df);
        2.0 * (1.0 - normal_cdf(t * correction.sqrt()))
    }
}

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function approximation
///
/// Horner's method for the polynomial approximation, accurate to ~1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Inverse of the standard normal CDF (quantile function)
///
/// Acklam's rational approximation, relative error below 1.15e-9. Input
/// must lie strictly within (0, 1); out-of-range inputs saturate.
pub fn inverse_normal_cdf(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
