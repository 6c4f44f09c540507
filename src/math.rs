use itertools::Itertools;
use statrs::distribution::{ChiSquared, ContinuousCDF};

pub fn weighted_mean(x: &[f64], weights: &[f64]) -> f64 {
    let sum = x
        .iter()
        .zip(weights.iter())
        .map(|(x, w)| x * w)
        .sum::<f64>();
    let sum_of_weights = weights.iter().sum::<f64>();
    sum / sum_of_weights
}

pub fn arithmetic_mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Minimum absolute pairwise correlation among `members`.
///
/// Sets with fewer than two members have purity 1.0.
pub fn min_abs_correlation<F>(members: &[usize], r: F) -> f64
where
    F: Fn(usize, usize) -> f64,
{
    members
        .iter()
        .tuple_combinations()
        .map(|(i, j)| r(*i, *j).abs())
        .fold(1.0, f64::min)
}

/// Normalizes log-weights into probabilities without overflow
pub fn softmax(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let exps = log_weights
        .iter()
        .map(|w| (w - max).exp())
        .collect::<Vec<_>>();
    let total = exps.iter().sum::<f64>();
    exps.into_iter().map(|e| e / total).collect()
}

/// Wakefield's log approximate Bayes factor for a single variant
pub fn wakefield_log_abf(beta: f64, se: f64, prior_variance: f64) -> f64 {
    let v = se * se;
    let r = prior_variance / (prior_variance + v);
    let z = beta / se;
    0.5 * ((1.0 - r).ln() + r * z * z)
}

/// Upper tail of the chi-squared distribution
pub fn pchisq(chisq: f64, df: f64) -> f64 {
    if !chisq.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    match ChiSquared::new(df) {
        Ok(dist) => 1.0 - dist.cdf(chisq.max(0.0)),
        Err(_) => f64::NAN,
    }
}

/// Cochran's Q for effect heterogeneity, with its p-value and I² (percent)
pub fn cochran_q(beta: &[f64], se: &[f64]) -> (f64, f64, f64) {
    let weights = se.iter().map(|s| 1.0 / (s * s)).collect::<Vec<_>>();
    let pooled = weighted_mean(beta, &weights);
    let q = beta
        .iter()
        .zip(weights.iter())
        .map(|(b, w)| w * (b - pooled).powi(2))
        .sum::<f64>();
    let df = (beta.len() - 1) as f64;
    let p_value = pchisq(q, df);
    let i_squared = if q > 0.0 {
        ((q - df) / q * 100.0).max(0.0)
    } else {
        0.0
    };
    (q, p_value, i_squared)
}
