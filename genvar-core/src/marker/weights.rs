//! Adaptive per-marker penalty weights.
//!
//! Each marker is tested once against the initial residual (Pearson
//! correlation, two-sided t-test with n-2 df). Strongly associated markers
//! are shrunk less: lambda_j / max(1 - p_j, min_weight).

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-sided p-value for the correlation between `w` and `e`.
///
/// Returns 1.0 when the test is undefined (n < 3 or a constant vector).
pub fn correlation_p_value(w: &[f64], e: &[f64]) -> f64 {
    let n = w.len();
    if n < 3 || e.len() != n {
        return 1.0;
    }
    let nf = n as f64;
    let mean_w = w.iter().sum::<f64>() / nf;
    let mean_e = e.iter().sum::<f64>() / nf;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in w.iter().zip(e) {
        let dx = a - mean_w;
        let dy = b - mean_e;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 1.0;
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = nf - 2.0;
    let t = r * (df / (1.0 - r * r)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Scale `lambda` in place by 1 / max(1 - p, min_weight).
pub fn apply_adaptive_weights(lambda: &mut [f64], p_values: &[f64], min_weight: f64) {
    for (l, p) in lambda.iter_mut().zip(p_values) {
        *l /= (1.0 - p).max(min_weight);
    }
}
