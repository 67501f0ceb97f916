use serde::{Deserialize, Serialize};

use crate::{
    domain::EntryFeatures,
    kinematics::state::{Regime, REGIME_SLOTS},
};

/// Number of z-score zones per feature axis.
pub const ZONE_COUNT: usize = 5;

/// Pseudo-observations pulling every cell toward a coin flip.
const PRIOR_WEIGHT: f64 = 10.0;
const PRIOR_WIN_RATE: f64 = 0.5;

/// Running win rate of one calibration cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCell {
    pub win_rate: f64,
    pub count: u32,
}

impl Default for CalibrationCell {
    fn default() -> Self {
        Self {
            win_rate: PRIOR_WIN_RATE,
            count: 0,
        }
    }
}

impl CalibrationCell {
    pub fn record(&mut self, win: bool) {
        self.count = self.count.saturating_add(1);
        let x = if win { 1.0 } else { 0.0 };
        self.win_rate += (x - self.win_rate) / self.count as f64;
    }

    /// Win rate shrunk toward 0.5 by [`PRIOR_WEIGHT`] pseudo-observations.
    pub fn shrunk(&self) -> f64 {
        let n = self.count as f64;
        (self.win_rate * n + PRIOR_WIN_RATE * PRIOR_WEIGHT) / (n + PRIOR_WEIGHT)
    }
}

/// Maps a z-score onto its zone: `z < -2`, `[-2, -1)`, `[-1, 1]`, `(1, 2]`, `z > 2`.
///
/// Non-finite input falls into the central zone.
pub fn zone_index(z: f64) -> usize {
    if !z.is_finite() {
        2
    } else if z < -2.0 {
        0
    } else if z < -1.0 {
        1
    } else if z <= 1.0 {
        2
    } else if z <= 2.0 {
        3
    } else {
        4
    }
}

/// Win-probability calibration tables.
///
/// Outcomes are bucketed by learning regime and by the zone of two entry
/// features. The estimate averages the matching cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityPredictor {
    pub regimes: [CalibrationCell; REGIME_SLOTS],
    pub chi_zones: [CalibrationCell; ZONE_COUNT],
    pub accel_zones: [CalibrationCell; ZONE_COUNT],
}

impl ProbabilityPredictor {
    pub fn record(&mut self, regime: Regime, features: Option<EntryFeatures>, win: bool) {
        if let Some(slot) = regime.learning_regime() {
            self.regimes[slot.index()].record(win);
        }
        if let Some(f) = features {
            self.chi_zones[zone_index(f.chi_z)].record(win);
            self.accel_zones[zone_index(f.accel_z)].record(win);
        }
    }

    /// Estimated probability that a trade opened now ends in profit, in [0, 1].
    pub fn win_probability(&self, regime: Regime, features: Option<EntryFeatures>) -> f64 {
        let regime_cell = regime.learning_regime().map(|r| self.regimes[r.index()]);
        let zone_cells = features
            .map(|f| {
                [
                    self.chi_zones[zone_index(f.chi_z)],
                    self.accel_zones[zone_index(f.accel_z)],
                ]
            })
            .into_iter()
            .flatten();

        let (sum, n) = regime_cell
            .into_iter()
            .chain(zone_cells)
            .fold((0.0, 0usize), |(sum, n), cell| (sum + cell.shrunk(), n + 1));

        if n == 0 {
            PRIOR_WIN_RATE
        } else {
            (sum / n as f64).clamp(0.0, 1.0)
        }
    }

    pub fn total_samples(&self) -> u32 {
        self.regimes
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_boundaries_are_exact() {
        assert_eq!(zone_index(-2.5), 0);
        assert_eq!(zone_index(-2.0), 1);
        assert_eq!(zone_index(-1.0001), 1);
        assert_eq!(zone_index(-1.0), 2);
        assert_eq!(zone_index(1.0), 2);
        assert_eq!(zone_index(1.5), 3);
        assert_eq!(zone_index(2.0), 3);
        assert_eq!(zone_index(2.01), 4);
        assert_eq!(zone_index(f64::NAN), 2);
    }

    #[test]
    fn fresh_predictor_is_a_coin_flip() {
        let p = ProbabilityPredictor::default();
        assert_eq!(p.win_probability(Regime::Trend, None), 0.5);
        assert_eq!(p.win_probability(Regime::Calibrating, None), 0.5);
    }

    #[test]
    fn shrinkage_pulls_small_samples_toward_half() {
        let mut p = ProbabilityPredictor::default();
        p.record(Regime::Trend, None, true);
        // (1 * 1 + 0.5 * 10) / 11
        assert!((p.win_probability(Regime::Trend, None) - 6.0 / 11.0).abs() < 1e-12);

        for _ in 0..1_000 {
            p.record(Regime::Trend, None, true);
        }
        assert!(p.win_probability(Regime::Trend, None) > 0.98);
    }

    #[test]
    fn features_feed_both_zone_tables() {
        let mut p = ProbabilityPredictor::default();
        let f = EntryFeatures {
            chi_z: 3.0,
            accel_z: -1.5,
        };
        p.record(Regime::MeanRev, Some(f), false);

        assert_eq!(p.chi_zones[4].count, 1);
        assert_eq!(p.accel_zones[1].count, 1);
        assert!(p.win_probability(Regime::MeanRev, Some(f)) < 0.5);
        assert_eq!(p.total_samples(), 1);
    }
}
