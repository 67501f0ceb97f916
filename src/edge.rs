//! Statistical edge gate.
//!
//! Decides whether an observed win rate is both economically meaningful
//! (clears a friction-adjusted hurdle) and statistically distinguishable from
//! a coin flip.

use crate::{
    config::EdgeConfig,
    math::stats::{normal_cdf, safe_div},
};

/// Below this many trades a sample is never considered significant.
pub const MIN_SIGNIFICANCE_SAMPLE: u32 = 10;

/// Null-hypothesis win rate.
const NULL_WIN_RATE: f64 = 0.5;

/// Upper-tail p-value of the observed win rate against a 50% null.
///
/// Uses the normal approximation `z = (p̂ - 0.5) / sqrt(0.25 / n)` and returns
/// `1 - Φ(z)`. Samples smaller than [`MIN_SIGNIFICANCE_SAMPLE`] return `1.0`.
/// `wins` above `total` is treated as invalid input and also returns `1.0`.
pub fn p_value(wins: u32, total: u32) -> f64 {
    if total < MIN_SIGNIFICANCE_SAMPLE || wins > total {
        return 1.0;
    }
    let n = total as f64;
    let observed = wins as f64 / n;
    let std_err = (NULL_WIN_RATE * (1.0 - NULL_WIN_RATE) / n).sqrt();
    let z = safe_div(observed - NULL_WIN_RATE, std_err, 0.0);
    (1.0 - normal_cdf(z)).clamp(0.0, 1.0)
}

/// Aggregate trade statistics fed to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EdgeSample {
    pub wins: u32,
    pub total: u32,
    /// Average winning trade, in account currency (positive).
    pub avg_win: f64,
    /// Average losing trade, in account currency (positive magnitude).
    pub avg_loss: f64,
    /// Average per-trade cost (spread, commission, slippage).
    pub avg_friction: f64,
}

impl EdgeSample {
    pub fn win_rate(&self) -> f64 {
        safe_div(self.wins as f64, self.total as f64, 0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EdgeGate {
    cfg: EdgeConfig,
}

impl EdgeGate {
    pub fn new(cfg: EdgeConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.cfg
    }

    /// Win rate required once friction is charged against the average win.
    ///
    /// A non-positive or non-finite average win makes the hurdle unreachable.
    pub fn hurdle(&self, avg_win: f64, avg_friction: f64) -> f64 {
        if !avg_win.is_finite() || avg_win <= 0.0 {
            return f64::INFINITY;
        }
        let friction = if avg_friction.is_finite() {
            avg_friction.max(0.0)
        } else {
            0.0
        };
        self.cfg.min_win_rate + friction / avg_win
    }

    pub fn has_edge(&self, sample: &EdgeSample) -> bool {
        if sample.total < self.cfg.min_trades.max(1) || sample.wins > sample.total {
            return false;
        }
        let win_rate = sample.win_rate();
        let hurdle = self.hurdle(sample.avg_win, sample.avg_friction);
        win_rate >= hurdle && p_value(sample.wins, sample.total) <= self.cfg.max_p_value
    }

    /// Convenience form of [`Self::has_edge`] with positional arguments.
    pub fn has_edge_with(
        &self,
        wins: u32,
        total: u32,
        avg_win: f64,
        avg_loss: f64,
        avg_friction: f64,
    ) -> bool {
        self.has_edge(&EdgeSample {
            wins,
            total,
            avg_win,
            avg_loss,
            avg_friction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> EdgeGate {
        EdgeGate::new(EdgeConfig::default())
    }

    // ========================================================================
    // p-value
    // ========================================================================

    #[test]
    fn small_samples_are_never_significant() {
        assert_eq!(p_value(9, 9), 1.0);
        assert_eq!(p_value(0, 0), 1.0);
    }

    #[test]
    fn coin_flip_has_p_value_one_half() {
        assert!((p_value(50, 100) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn strong_win_rate_is_significant() {
        // 70/100: z = 0.2 / 0.05 = 4
        let p = p_value(70, 100);
        assert!(p < 1e-3, "p = {p}");
    }

    #[test]
    fn invalid_counts_return_one() {
        assert_eq!(p_value(20, 10), 1.0);
    }

    // ========================================================================
    // has_edge
    // ========================================================================

    #[test]
    fn edge_requires_minimum_sample() {
        assert!(!gate().has_edge_with(20, 20, 10.0, 5.0, 0.0));
    }

    #[test]
    fn edge_detected_for_significant_win_rate() {
        assert!(gate().has_edge_with(70, 100, 10.0, 5.0, 0.0));
    }

    #[test]
    fn friction_raises_the_hurdle() {
        // 58% clears 0.5 but not 0.5 + 1/10
        let g = gate();
        assert!(g.has_edge_with(580, 1000, 10.0, 10.0, 0.0));
        assert!(!g.has_edge_with(580, 1000, 10.0, 10.0, 1.0));
    }

    #[test]
    fn degenerate_averages_never_pass() {
        let g = gate();
        assert!(!g.has_edge_with(70, 100, 0.0, 5.0, 0.0));
        assert!(!g.has_edge_with(70, 100, f64::NAN, 5.0, 0.0));
        assert!(g.has_edge_with(70, 100, 10.0, 5.0, f64::NAN));
    }
}
