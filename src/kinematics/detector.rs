use itertools::{Itertools, MinMaxResult};

use crate::{
    config::DetectorConfig,
    domain::{Price, Volatility},
    kinematics::state::{KinematicState, MicroState, Regime},
    math::{
        indicator::{StreamingEma, StreamingIndicator, StreamingSma},
        stats::{OnlineStats, safe_div},
    },
    ring_buffer::RingBuffer,
};

const CHI_MIN: f64 = 0.5;
const CHI_MAX: f64 = 2.5;
/// Chi reported before the reversal window is filled (random-walk level).
const CHI_NEUTRAL: f64 = 1.0;
const CRITICAL_CONFIDENCE: f64 = 0.25;

/// Streaming kinematic regime detector for a single instrument.
///
/// Each accepted observation is processed to completion: derivatives are
/// updated, the oscillation score is recomputed, and the micro-state and
/// regime are re-classified. Invalid observations are rejected without
/// touching any internal state.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    cfg: DetectorConfig,

    /// Recent prices over the macro window, for the range position.
    prices: RingBuffer<f64>,
    /// Recent velocities over the chi window, for reversal counting.
    velocities: RingBuffer<f64>,

    prev_price: Option<f64>,
    prev_velocity: Option<f64>,
    prev_acceleration: Option<f64>,

    micro: StreamingSma,
    meso: StreamingSma,
    macro_: StreamingSma,

    accel_stats: OnlineStats,
    chi_stats: OnlineStats,
    confidence: StreamingEma,

    observations: u64,
    state: KinematicState,
}

impl RegimeDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            prices: RingBuffer::new(cfg.macro_window),
            velocities: RingBuffer::new(cfg.chi_window),
            prev_price: None,
            prev_velocity: None,
            prev_acceleration: None,
            micro: StreamingSma::new(cfg.micro_window),
            meso: StreamingSma::new(cfg.meso_window),
            macro_: StreamingSma::new(cfg.macro_window),
            accel_stats: OnlineStats::default(),
            chi_stats: OnlineStats::default(),
            confidence: StreamingEma::new(cfg.micro_window),
            observations: 0,
            state: KinematicState::default(),
            cfg,
        }
    }

    /// Feeds one observation.
    ///
    /// Returns `false` if the observation was rejected (non-finite or
    /// non-positive price, non-finite volatility). A finite volatility `<= 0`
    /// is clamped to the configured epsilon.
    pub fn update(&mut self, price: Price, volatility: Volatility) -> bool {
        let Some(price) = price.checked() else {
            tracing::debug!(price = price.0, "Rejected tick: invalid price");
            return false;
        };
        if !volatility.0.is_finite() {
            tracing::debug!(volatility = volatility.0, "Rejected tick: invalid volatility");
            return false;
        }
        let vol = volatility.0.max(self.cfg.volatility_epsilon);

        self.observations += 1;
        self.prices.push(price);

        // 1. Derivatives
        let Some(prev_price) = self.prev_price.replace(price) else {
            self.state = self.calibrating_state(vol);
            return true;
        };

        let velocity = (price - prev_price) / vol;
        let acceleration = self.prev_velocity.map(|pv| velocity - pv).unwrap_or(0.0);
        let jerk = self
            .prev_acceleration
            .map(|pa| acceleration - pa)
            .unwrap_or(0.0);

        // The z-score is measured against history excluding the current sample
        let accel_z = if self.prev_velocity.is_some() {
            let z = self.accel_stats.z_score(acceleration, self.min_std());
            self.accel_stats.add(acceleration);
            z
        } else {
            0.0
        };

        if self.prev_velocity.is_some() {
            self.prev_acceleration = Some(acceleration);
        }
        self.prev_velocity = Some(velocity);

        // 2. Timescale averages
        self.velocities.push(velocity);
        let micro_velocity = self.micro.update(velocity);
        let meso_velocity = self.meso.update(velocity);
        let macro_velocity = self.macro_.update(velocity);

        // 3. Oscillation intensity
        let (chi, chi_z) = if self.velocities.is_full() {
            let chi = self.chi();
            let z = self.chi_stats.z_score(chi, self.min_std());
            self.chi_stats.add(chi);
            (chi, z)
        } else {
            (CHI_NEUTRAL, 0.0)
        };

        let (Some(micro_velocity), Some(meso_velocity), Some(macro_velocity)) =
            (micro_velocity, meso_velocity, macro_velocity)
        else {
            self.state = self.calibrating_state(vol);
            return true;
        };

        // 4. Classification
        let mass = self.mass(vol);
        let mut next = KinematicState {
            position: self.position(),
            velocity,
            acceleration,
            jerk,
            micro_velocity,
            meso_velocity,
            macro_velocity,
            chi,
            chi_z,
            accel_z,
            mass,
            momentum: mass * velocity,
            micro_state: MicroState::Cruising,
            regime: Regime::Calibrating,
            confidence: 0.0,
            persistence: 0,
        };

        next.micro_state = self.classify_micro_state(&next);
        let unchanged = next.micro_state == self.state.micro_state;
        next.persistence = if unchanged && !self.state.is_calibrating() {
            self.state.persistence.saturating_add(1)
        } else {
            1
        };
        next.regime = self.classify_regime(&next);

        let raw_confidence = self.raw_confidence(&next);
        next.confidence = self
            .confidence
            .update(raw_confidence)
            .unwrap_or(raw_confidence)
            .clamp(0.0, 1.0);

        if next.regime != self.state.regime {
            tracing::debug!(
                from = %self.state.regime,
                to = %next.regime,
                micro_state = %next.micro_state,
                chi = next.chi,
                "Regime change"
            );
        }

        self.state = next;
        true
    }

    pub fn state(&self) -> KinematicState {
        self.state
    }

    /// `true` once one full macro window of velocities has been observed.
    pub fn is_ready(&self) -> bool {
        self.macro_.value().is_some()
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.cfg.clone());
    }

    // ============================================================================================
    // Features
    // ============================================================================================

    /// Maps the density of velocity sign reversals onto the chi scale.
    ///
    /// A random walk reverses on about half of its steps, giving chi ~ 1.
    fn chi(&self) -> f64 {
        let db = self.cfg.deadband;
        let pairs = self.velocities.len().saturating_sub(1);
        let reversals = self
            .velocities
            .iter()
            .tuple_windows()
            .filter(|(a, b)| (*a > db && *b < -db) || (*a < -db && *b > db))
            .count();
        let density = safe_div(reversals as f64, pairs as f64, 0.5);
        (2.0 * density).clamp(CHI_MIN, CHI_MAX)
    }

    fn position(&self) -> f64 {
        let Some(current) = self.prices.latest() else {
            return 0.5;
        };
        match self.prices.iter().minmax() {
            MinMaxResult::MinMax(lo, hi) if hi - lo > self.cfg.deadband => {
                ((current - lo) / (hi - lo)).clamp(0.0, 1.0)
            }
            _ => 0.5,
        }
    }

    fn mass(&self, vol: f64) -> f64 {
        safe_div(1.0, vol, self.cfg.mass_cap).min(self.cfg.mass_cap)
    }

    fn min_std(&self) -> f64 {
        self.cfg.deadband * 1e3
    }

    fn calibrating_state(&self, vol: f64) -> KinematicState {
        KinematicState {
            position: self.position(),
            mass: self.mass(vol),
            ..KinematicState::default()
        }
    }

    // ============================================================================================
    // Classification
    // ============================================================================================

    /// Priority-ordered decision list; the first match wins.
    fn classify_micro_state(&self, s: &KinematicState) -> MicroState {
        let db = self.cfg.deadband;

        if s.accel_z.abs() > self.cfg.explosive_accel_z {
            MicroState::Explosive
        } else if s.acceleration > db && s.jerk > db {
            MicroState::Accelerating
        } else if s.acceleration < -db && s.jerk < -db {
            MicroState::Decelerating
        } else if s.chi_z > self.cfg.oscillating_chi_z {
            MicroState::Oscillating
        } else if s.velocity.abs() < self.cfg.reverting_velocity
            && s.position > 1.0 / 3.0
            && s.position < 2.0 / 3.0
        {
            MicroState::Reverting
        } else {
            MicroState::Cruising
        }
    }

    fn classify_regime(&self, s: &KinematicState) -> Regime {
        let alignment = s.alignment(self.cfg.deadband);

        if s.micro_state == MicroState::Explosive && alignment > 0.0 {
            Regime::Breakout
        } else if alignment >= self.cfg.trend_min_alignment
            && s.chi <= self.cfg.trend_max_chi
            && s.meso_velocity.abs() >= self.cfg.trend_min_meso_velocity
        {
            Regime::Trend
        } else if s.chi >= self.cfg.mean_rev_min_chi
            || matches!(s.micro_state, MicroState::Oscillating | MicroState::Reverting)
        {
            Regime::MeanRev
        } else {
            Regime::Critical
        }
    }

    fn raw_confidence(&self, s: &KinematicState) -> f64 {
        let persistence =
            (s.persistence as f64 / self.cfg.micro_window.max(1) as f64).min(1.0);
        match s.regime {
            Regime::Breakout | Regime::Trend => {
                0.5 * s.alignment(self.cfg.deadband) + 0.5 * persistence
            }
            Regime::MeanRev => (0.5 + 0.25 * s.chi_z).clamp(0.0, 1.0),
            Regime::Critical => CRITICAL_CONFIDENCE,
            Regime::Calibrating => 0.0,
        }
    }
}
