//! Serializable statistics snapshot for display collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    breaker::{BreakerStatus, CircuitBreaker},
    domain::AgentId,
    error::{CoreResult, SystemError},
    kinematics::state::LearningRegime,
    learner::{AgentProfile, RegimeStats, TradingAgent},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStatistics {
    pub regime: LearningRegime,
    pub trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub q_buy: f64,
    pub q_sell: f64,
    pub q_hold: f64,
    pub learning_rate: f64,
}

impl RegimeStatistics {
    fn new(regime: LearningRegime, stats: &RegimeStats) -> Self {
        Self {
            regime,
            trades: stats.cumulative.trades,
            win_rate: stats.win_rate(),
            profit_factor: stats.profit_factor(),
            q_buy: stats.q_buy,
            q_sell: stats.q_sell,
            q_hold: stats.q_hold,
            learning_rate: stats.learning_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStatistics {
    pub trades: u32,
    pub session_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub pnl: f64,
    pub regimes: Vec<RegimeStatistics>,
}

impl From<&AgentProfile> for ProfileStatistics {
    fn from(p: &AgentProfile) -> Self {
        Self {
            trades: p.total_trades(),
            session_trades: p.session_totals().trades,
            win_rate: p.win_rate(),
            profit_factor: p.profit_factor(),
            pnl: p.totals().pnl,
            regimes: LearningRegime::ALL
                .iter()
                .map(|r| RegimeStatistics::new(*r, p.regime(*r)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub agent: AgentId,
    pub capital_allocation: f64,
    pub swap_count: u32,
    pub last_swap: Option<DateTime<Utc>>,
    pub consecutive_losses: u32,
    pub rolling_win_rate: Option<f64>,
    pub live: ProfileStatistics,
    pub challenger: ProfileStatistics,
}

impl From<&TradingAgent> for AgentStatistics {
    fn from(a: &TradingAgent) -> Self {
        Self {
            agent: a.id(),
            capital_allocation: a.capital_allocation(),
            swap_count: a.swap_count(),
            last_swap: a.last_swap(),
            consecutive_losses: a.consecutive_losses(),
            rolling_win_rate: a.rolling_win_rate(),
            live: a.live().into(),
            challenger: a.challenger().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatistics {
    pub status: BreakerStatus,
    pub halted_at: Option<DateTime<Utc>>,
    pub halt_reason: Option<String>,
    pub peak_equity: f64,
    pub drawdown: f64,
    pub daily_pnl: f64,
    pub retraining_trades: u32,
    pub retraining_win_rate: f64,
}

impl From<&CircuitBreaker> for BreakerStatistics {
    fn from(b: &CircuitBreaker) -> Self {
        Self {
            status: b.status(),
            halted_at: b.halt_record().map(|h| h.at),
            halt_reason: b.halt_record().map(|h| h.reason.clone()),
            peak_equity: b.peak_equity(),
            drawdown: b.drawdown(),
            daily_pnl: b.daily_pnl(),
            retraining_trades: b.retraining().trades,
            retraining_win_rate: b.retraining().win_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreStatistics {
    pub instruments: usize,
    pub predictor_samples: u32,
    pub breaker: BreakerStatistics,
    pub agents: Vec<AgentStatistics>,
}

impl CoreStatistics {
    pub fn agent(&self, id: AgentId) -> Option<&AgentStatistics> {
        self.agents.iter().find(|a| a.agent == id)
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SystemError::Serialization(e.to_string()).into())
    }
}
