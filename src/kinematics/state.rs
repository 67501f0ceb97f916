use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Number of regimes the learner keeps statistics for.
pub const REGIME_SLOTS: usize = 3;

/// Kinematic micro-state of the price path.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum MicroState {
    Accelerating,
    #[default]
    Cruising,
    Decelerating,
    Reverting,
    Oscillating,
    Explosive,
}

/// Trading regime derived from the kinematic state.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum Regime {
    Breakout,
    Trend,
    MeanRev,
    Critical,
    /// Not enough data observed yet.
    #[default]
    Calibrating,
}

impl Regime {
    /// Maps the regime onto the learner's statistics slot.
    ///
    /// Breakouts share the directional `Trend` slot; `Calibrating` has no slot.
    pub fn learning_regime(self) -> Option<LearningRegime> {
        match self {
            Self::Breakout | Self::Trend => Some(LearningRegime::Trend),
            Self::MeanRev => Some(LearningRegime::MeanRev),
            Self::Critical => Some(LearningRegime::Critical),
            Self::Calibrating => None,
        }
    }

    pub fn is_calibrating(self) -> bool {
        matches!(self, Self::Calibrating)
    }
}

/// The three regimes the learner keeps separate statistics for.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum LearningRegime {
    Trend,
    MeanRev,
    Critical,
}

impl LearningRegime {
    pub const ALL: [Self; REGIME_SLOTS] = [Self::Trend, Self::MeanRev, Self::Critical];

    pub fn index(self) -> usize {
        match self {
            Self::Trend => 0,
            Self::MeanRev => 1,
            Self::Critical => 2,
        }
    }

    /// Out-of-range indices yield `None`.
    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

impl From<LearningRegime> for Regime {
    fn from(value: LearningRegime) -> Self {
        match value {
            LearningRegime::Trend => Self::Trend,
            LearningRegime::MeanRev => Self::MeanRev,
            LearningRegime::Critical => Self::Critical,
        }
    }
}

/// Per-instrument motion state, recomputed on every accepted observation.
///
/// Velocity, acceleration and jerk are the first three differences of price,
/// normalized by the volatility estimate. Before the detector has seen one full
/// macro window, every derived field holds its neutral default and `regime` is
/// [`Regime::Calibrating`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    /// Price level within the recent macro-window range, in [0, 1].
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
    pub micro_velocity: f64,
    pub meso_velocity: f64,
    pub macro_velocity: f64,
    /// Oscillation intensity derived from velocity sign reversals.
    pub chi: f64,
    pub chi_z: f64,
    /// Z-score of the latest acceleration against its running distribution.
    pub accel_z: f64,
    /// Inverse volatility, capped.
    pub mass: f64,
    pub momentum: f64,
    pub micro_state: MicroState,
    pub regime: Regime,
    pub confidence: f64,
    /// Consecutive observations spent in the current micro-state.
    pub persistence: u32,
}

impl Default for KinematicState {
    fn default() -> Self {
        Self {
            position: 0.5,
            velocity: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
            micro_velocity: 0.0,
            meso_velocity: 0.0,
            macro_velocity: 0.0,
            chi: 1.0,
            chi_z: 0.0,
            accel_z: 0.0,
            mass: 0.0,
            momentum: 0.0,
            micro_state: MicroState::default(),
            regime: Regime::Calibrating,
            confidence: 0.0,
            persistence: 0,
        }
    }
}

impl KinematicState {
    pub fn is_calibrating(&self) -> bool {
        self.regime.is_calibrating()
    }

    /// Cross-timescale alignment in [0, 1].
    ///
    /// Zero unless micro, meso and macro velocities share the same non-zero
    /// sign; otherwise the ratio of the smallest to the largest magnitude.
    pub fn alignment(&self, deadband: f64) -> f64 {
        let vs = [self.micro_velocity, self.meso_velocity, self.macro_velocity];
        let all_up = vs.iter().all(|v| *v > deadband);
        let all_down = vs.iter().all(|v| *v < -deadband);
        if !(all_up || all_down) {
            return 0.0;
        }
        let (lo, hi) = vs
            .iter()
            .map(|v| v.abs())
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if hi <= 0.0 { 0.0 } else { lo / hi }
    }
}
