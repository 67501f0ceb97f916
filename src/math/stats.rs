use serde::{Deserialize, Serialize};

/// Welford running mean/variance. Non-finite samples are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
}

impl OnlineStats {
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;

        let delta = x - self.mean;
        self.mean += delta / (self.n as f64);
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance (n - 1 denominator). Zero with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            (self.m2 / (self.n - 1) as f64).max(0.0)
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z-score of `x` against the running distribution.
    ///
    /// Returns 0 when `x` is not finite or when the standard deviation is below
    /// `min_std` (a degenerate distribution has no meaningful z-score).
    pub fn z_score(&self, x: f64, min_std: f64) -> f64 {
        let std = self.std_dev();
        if !x.is_finite() || !std.is_finite() || std < min_std {
            return 0.0;
        }
        (x - self.mean()) / std
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ================================================================================================
// Normal Distribution
// ================================================================================================

/// Standard normal CDF via the error function.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function, Abramowitz & Stegun 7.1.26 (max abs error 1.5e-7).
pub fn erf(x: f64) -> f64 {
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

// ================================================================================================
// Guarded Arithmetic
// ================================================================================================

/// Divides `num / den`, returning `fallback` if the denominator is too small or
/// the result is not finite.
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if !num.is_finite() || !den.is_finite() || den.abs() < f64::EPSILON {
        return fallback;
    }
    let out = num / den;
    if out.is_finite() { out } else { fallback }
}

/// Replaces a non-finite value with `fallback`.
pub fn finite_or(x: f64, fallback: f64) -> f64 {
    if x.is_finite() { x } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass_variance() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = OnlineStats::default();
        xs.iter().for_each(|&x| stats.add(x));

        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;

        assert_eq!(stats.n(), 8);
        assert!((stats.mean() - 5.0).abs() < 1e-12);
        assert!((stats.variance() - var).abs() < 1e-12);
    }

    #[test]
    fn welford_skips_non_finite_samples() {
        let mut stats = OnlineStats::default();
        stats.add(1.0);
        stats.add(f64::NAN);
        stats.add(f64::NEG_INFINITY);
        assert_eq!(stats.n(), 1);
    }

    #[test]
    fn z_score_is_zero_for_degenerate_distribution() {
        let mut stats = OnlineStats::default();
        (0..10).for_each(|_| stats.add(3.0));
        assert_eq!(stats.z_score(100.0, 1e-6), 0.0);
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
        assert_eq!(normal_cdf(f64::NAN), 0.5);
    }

    #[test]
    fn safe_div_guards_zero_and_nan() {
        assert_eq!(safe_div(1.0, 0.0, 7.0), 7.0);
        assert_eq!(safe_div(f64::NAN, 1.0, 7.0), 7.0);
        assert_eq!(safe_div(6.0, 3.0, 7.0), 2.0);
    }
}
