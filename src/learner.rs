//! Dual-agent policy learner.
//!
//! Each [`TradingAgent`] holds a frozen live policy and a challenger that
//! learns from every closed trade. The challenger replaces the live policy
//! once it is economically superior on a sufficient sample.

pub mod agent;
pub mod predictor;
pub mod profile;
pub mod regime_stats;

pub use agent::{AgentParts, AgentRewardShaper, TradingAgent};
pub use predictor::{CalibrationCell, ProbabilityPredictor};
pub use profile::AgentProfile;
pub use regime_stats::{RegimeStats, TradeCounters};
