use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    domain::AgentId,
    error::{ConfigError, CoreResult},
    kinematics::state::REGIME_SLOTS,
};

// ================================================================================================
// Kinematic Detector
// ================================================================================================

/// Windows and thresholds of the kinematic regime detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Short averaging window for velocity (ticks).
    pub micro_window: usize,
    /// Medium averaging window for velocity (ticks).
    pub meso_window: usize,
    /// Long averaging window; also the warm-up length.
    pub macro_window: usize,
    /// Number of recent velocities scanned for sign reversals.
    pub chi_window: usize,
    /// Upper bound of the synthetic mass (inverse volatility).
    pub mass_cap: f64,
    /// Replacement for non-positive volatility estimates.
    pub volatility_epsilon: f64,
    /// |acceleration z-score| above which the micro-state is Explosive.
    pub explosive_accel_z: f64,
    /// Chi z-score above which the micro-state is Oscillating.
    pub oscillating_chi_z: f64,
    /// |velocity| below which a mid-range price is Reverting.
    pub reverting_velocity: f64,
    /// Minimum cross-timescale alignment for a Trend.
    pub trend_min_alignment: f64,
    /// Maximum chi for a Trend.
    pub trend_max_chi: f64,
    /// Minimum |meso velocity| for a Trend.
    pub trend_min_meso_velocity: f64,
    /// Chi at or above which the regime is MeanRev.
    pub mean_rev_min_chi: f64,
    /// Magnitudes below this count as zero in sign tests.
    pub deadband: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            micro_window: 5,
            meso_window: 20,
            macro_window: 60,
            chi_window: 20,
            mass_cap: 10.0,
            volatility_epsilon: 1e-8,
            explosive_accel_z: 2.5,
            oscillating_chi_z: 1.0,
            reverting_velocity: 0.1,
            trend_min_alignment: 0.6,
            trend_max_chi: 1.0,
            trend_min_meso_velocity: 0.05,
            mean_rev_min_chi: 1.5,
            deadband: 1e-9,
        }
    }
}

impl DetectorConfig {
    /// Sets micro/meso/macro windows in one go.
    pub fn with_windows(self, micro: usize, meso: usize, macro_: usize) -> Self {
        Self {
            micro_window: micro,
            meso_window: meso,
            macro_window: macro_,
            ..self
        }
    }

    pub fn with_chi_window(self, chi_window: usize) -> Self {
        Self { chi_window, ..self }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_window("micro_window", self.micro_window, 1)?;
        check_window("meso_window", self.meso_window, self.micro_window)?;
        check_window("macro_window", self.macro_window, self.meso_window)?;
        check_window("chi_window", self.chi_window, 2)?;
        if self.chi_window > self.macro_window {
            return Err(ConfigError::InvalidValue {
                name: "chi_window",
                msg: format!(
                    "{} exceeds macro_window {}",
                    self.chi_window, self.macro_window
                ),
            });
        }
        check_positive("mass_cap", self.mass_cap)?;
        check_positive("volatility_epsilon", self.volatility_epsilon)?;
        check_positive("deadband", self.deadband)?;
        Ok(())
    }
}

// ================================================================================================
// Agents
// ================================================================================================

/// Configuration record of one trading personality.
///
/// Both personalities share the same code path; they differ only in these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate of a fresh regime, and the upper bound of every step size.
    pub initial_learning_rate: f64,
    /// Lower bound of the decayed learning rate.
    pub learning_rate_floor: f64,
    /// Multiplicative decay applied after every update, in (0, 1].
    pub learning_rate_decay: f64,
    /// Upper bound of the surprise boost factor.
    pub max_surprise_boost: f64,
    /// Challenger trades required before a promotion is considered.
    pub min_promotion_trades: u32,
    /// Challenger profit factor must exceed the live one by this factor.
    pub swap_threshold: f64,
    /// Capacity of the rolling live P&L window.
    pub rolling_window: usize,
    /// Fraction of capital assigned to this agent, in [0, 1].
    pub capital_allocation: f64,
    /// Probability of a uniformly random challenger action.
    pub exploration: f64,
    /// Multiplier applied to losing P&L when shaping rewards.
    pub loss_aversion: f64,
    /// Preference for each learning regime, indexed by
    /// [`LearningRegime::index`](crate::kinematics::state::LearningRegime::index).
    pub regime_affinity: [f64; REGIME_SLOTS],
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::patient()
    }
}

impl AgentConfig {
    /// Patient, trend-following personality.
    pub fn patient() -> Self {
        Self {
            initial_learning_rate: 0.10,
            learning_rate_floor: 0.01,
            learning_rate_decay: 0.995,
            max_surprise_boost: 2.0,
            min_promotion_trades: 20,
            swap_threshold: 1.25,
            rolling_window: 20,
            capital_allocation: 0.5,
            exploration: 0.05,
            loss_aversion: 1.5,
            regime_affinity: [1.0, 0.4, 0.2],
        }
    }

    /// Aggressive, volatility-seeking personality.
    pub fn aggressive() -> Self {
        Self {
            initial_learning_rate: 0.20,
            learning_rate_floor: 0.02,
            learning_rate_decay: 0.99,
            max_surprise_boost: 3.0,
            min_promotion_trades: 10,
            swap_threshold: 1.15,
            rolling_window: 10,
            capital_allocation: 0.5,
            exploration: 0.15,
            loss_aversion: 1.0,
            regime_affinity: [0.6, 1.0, 0.5],
        }
    }

    pub fn with_learning_rate(self, initial: f64, floor: f64, decay: f64) -> Self {
        Self {
            initial_learning_rate: initial,
            learning_rate_floor: floor,
            learning_rate_decay: decay,
            ..self
        }
    }

    pub fn with_promotion(self, min_trades: u32, swap_threshold: f64) -> Self {
        Self {
            min_promotion_trades: min_trades,
            swap_threshold,
            ..self
        }
    }

    pub fn with_rolling_window(self, rolling_window: usize) -> Self {
        Self {
            rolling_window,
            ..self
        }
    }

    pub fn with_exploration(self, exploration: f64) -> Self {
        Self {
            exploration,
            ..self
        }
    }

    /// Clamps a learning rate into `[floor, initial]`. Non-finite input maps to
    /// the initial rate.
    pub fn clamp_learning_rate(&self, rate: f64) -> f64 {
        if !rate.is_finite() {
            return self.initial_learning_rate;
        }
        rate.max(self.learning_rate_floor).min(self.initial_learning_rate)
    }

    pub fn validate(&self, who: AgentId) -> Result<(), ConfigError> {
        check_positive("initial_learning_rate", self.initial_learning_rate)?;
        check_positive("learning_rate_floor", self.learning_rate_floor)?;
        if self.learning_rate_floor > self.initial_learning_rate {
            return Err(ConfigError::InvalidValue {
                name: "learning_rate_floor",
                msg: format!(
                    "{who}: floor {} exceeds initial rate {}",
                    self.learning_rate_floor, self.initial_learning_rate
                ),
            });
        }
        check_unit("learning_rate_decay", self.learning_rate_decay)?;
        if self.learning_rate_decay <= 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "learning_rate_decay",
                msg: format!("{who}: decay must be > 0"),
            });
        }
        if !(self.max_surprise_boost >= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "max_surprise_boost",
                msg: format!("{who}: must be >= 1, got {}", self.max_surprise_boost),
            });
        }
        check_positive("swap_threshold", self.swap_threshold)?;
        check_window("rolling_window", self.rolling_window, 1)?;
        check_unit("capital_allocation", self.capital_allocation)?;
        check_unit("exploration", self.exploration)?;
        check_positive("loss_aversion", self.loss_aversion)?;
        Ok(())
    }
}

// ================================================================================================
// Edge Gate
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Minimum sample size before an edge can be claimed.
    pub min_trades: u32,
    /// Win-rate hurdle before friction.
    pub min_win_rate: f64,
    /// Maximum p-value for a significant edge.
    pub max_p_value: f64,
    /// Average per-trade friction (spread + commission) in account currency.
    pub avg_friction: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_trades: 30,
            min_win_rate: 0.5,
            max_p_value: 0.05,
            avg_friction: 0.0,
        }
    }
}

impl EdgeConfig {
    pub fn with_min_trades(self, min_trades: u32) -> Self {
        Self { min_trades, ..self }
    }

    pub fn with_avg_friction(self, avg_friction: f64) -> Self {
        Self {
            avg_friction,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("min_win_rate", self.min_win_rate)?;
        check_unit("max_p_value", self.max_p_value)?;
        if !(self.avg_friction.is_finite() && self.avg_friction >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "avg_friction",
                msg: format!("must be finite and >= 0, got {}", self.avg_friction),
            });
        }
        Ok(())
    }
}

// ================================================================================================
// Circuit Breaker
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Maximum intraday loss as a fraction of day-start equity.
    pub max_daily_loss_ratio: f64,
    /// Consecutive live losses that trip the breaker.
    pub max_consecutive_losses: u32,
    /// Rolling win rate below which the breaker trips. Measured over each
    /// agent's live risk window ([`AgentConfig::rolling_window`]).
    pub min_rolling_win_rate: f64,
    /// Maximum drawdown from peak equity, as a fraction.
    pub max_drawdown: f64,
    /// Minutes spent Halted before retraining begins.
    pub cooldown_minutes: i64,
    /// Probation sample size.
    pub retrain_min_trades: u32,
    pub retrain_min_win_rate: f64,
    pub retrain_min_profit_factor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_ratio: 0.05,
            max_consecutive_losses: 5,
            min_rolling_win_rate: 0.30,
            max_drawdown: 0.15,
            cooldown_minutes: 60,
            retrain_min_trades: 20,
            retrain_min_win_rate: 0.50,
            retrain_min_profit_factor: 1.2,
        }
    }
}

impl BreakerConfig {
    pub fn with_max_consecutive_losses(self, max_consecutive_losses: u32) -> Self {
        Self {
            max_consecutive_losses,
            ..self
        }
    }

    pub fn with_cooldown_minutes(self, cooldown_minutes: i64) -> Self {
        Self {
            cooldown_minutes,
            ..self
        }
    }

    pub fn with_probation(
        self,
        min_trades: u32,
        min_win_rate: f64,
        min_profit_factor: f64,
    ) -> Self {
        Self {
            retrain_min_trades: min_trades,
            retrain_min_win_rate: min_win_rate,
            retrain_min_profit_factor: min_profit_factor,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("max_daily_loss_ratio", self.max_daily_loss_ratio)?;
        check_unit("min_rolling_win_rate", self.min_rolling_win_rate)?;
        check_unit("max_drawdown", self.max_drawdown)?;
        check_unit("retrain_min_win_rate", self.retrain_min_win_rate)?;
        if self.max_consecutive_losses == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_consecutive_losses",
                msg: "must be >= 1".to_string(),
            });
        }
        if self.cooldown_minutes < 0 {
            return Err(ConfigError::InvalidValue {
                name: "cooldown_minutes",
                msg: format!("must be >= 0, got {}", self.cooldown_minutes),
            });
        }
        if !(self.retrain_min_profit_factor.is_finite() && self.retrain_min_profit_factor >= 0.0) {
            return Err(ConfigError::InvalidValue {
                name: "retrain_min_profit_factor",
                msg: format!("must be finite and >= 0, got {}", self.retrain_min_profit_factor),
            });
        }
        Ok(())
    }
}

// ================================================================================================
// Persistence
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Directory holding the main, backup and temporary snapshot files.
    pub directory: PathBuf,
    /// File stem shared by `<stem>.bin`, `<stem>.bak` and `<stem>.tmp`.
    pub file_stem: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("state"),
            file_stem: "quantum_core".to_string(),
        }
    }
}

impl PersistenceConfig {
    pub fn with_directory(self, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..self
        }
    }

    pub fn main_path(&self) -> PathBuf {
        self.directory.join(format!("{}.bin", self.file_stem))
    }

    pub fn backup_path(&self) -> PathBuf {
        self.directory.join(format!("{}.bak", self.file_stem))
    }

    pub fn temp_path(&self) -> PathBuf {
        self.directory.join(format!("{}.tmp", self.file_stem))
    }
}

// ================================================================================================
// Core Configuration
// ================================================================================================

/// Configuration blueprint of the whole decision core.
///
/// Every record is `#[serde(default)]`, so a JSON document only needs to name
/// the values it overrides:
///
/// ```
/// # use quantum_core::config::CoreConfig;
/// let cfg = CoreConfig::from_json_str(r#"{ "breaker": { "cooldown_minutes": 15 } }"#).unwrap();
/// assert_eq!(cfg.breaker.cooldown_minutes, 15);
/// assert_eq!(cfg.breaker.max_consecutive_losses, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub detector: DetectorConfig,
    pub patient: AgentConfig,
    pub aggressive: AgentConfig,
    pub edge: EdgeConfig,
    pub breaker: BreakerConfig,
    pub persistence: PersistenceConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            patient: AgentConfig::patient(),
            aggressive: AgentConfig::aggressive(),
            edge: EdgeConfig::default(),
            breaker: BreakerConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn with_detector(self, detector: DetectorConfig) -> Self {
        Self { detector, ..self }
    }

    pub fn with_agent(self, id: AgentId, cfg: AgentConfig) -> Self {
        match id {
            AgentId::Patient => Self {
                patient: cfg,
                ..self
            },
            AgentId::Aggressive => Self {
                aggressive: cfg,
                ..self
            },
        }
    }

    pub fn with_edge(self, edge: EdgeConfig) -> Self {
        Self { edge, ..self }
    }

    pub fn with_breaker(self, breaker: BreakerConfig) -> Self {
        Self { breaker, ..self }
    }

    pub fn with_persistence(self, persistence: PersistenceConfig) -> Self {
        Self {
            persistence,
            ..self
        }
    }

    pub fn agent(&self, id: AgentId) -> &AgentConfig {
        match id {
            AgentId::Patient => &self.patient,
            AgentId::Aggressive => &self.aggressive,
        }
    }

    /// Parses a (possibly partial) JSON document and validates the result.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.patient.validate(AgentId::Patient)?;
        self.aggressive.validate(AgentId::Aggressive)?;
        self.edge.validate()?;
        self.breaker.validate()?;
        Ok(())
    }

    /// Computes a deterministic fingerprint of this configuration.
    ///
    /// Logged with every snapshot so that persisted state can be traced back
    /// to the parameters that produced it.
    pub fn fingerprint(&self) -> CoreResult<String> {
        let mut hasher = blake3::Hasher::new();
        let bytes = postcard::to_stdvec(self).map_err(ConfigError::Encoding)?;
        hasher.update(&bytes);
        Ok(format!("{}", hasher.finalize()))
    }
}

// ================================================================================================
// Internal Helper
// ================================================================================================

fn check_window(name: &'static str, value: usize, min: usize) -> Result<(), ConfigError> {
    if value < min.max(1) {
        return Err(ConfigError::InvalidWindow {
            name,
            value,
            min: min.max(1),
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::InvalidValue {
            name,
            msg: format!("must be finite and > 0, got {value}"),
        });
    }
    Ok(())
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            name,
            msg: format!("must be within [0, 1], got {value}"),
        });
    }
    Ok(())
}
