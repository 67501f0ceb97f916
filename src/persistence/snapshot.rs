use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    breaker::{BreakerStatus, CircuitBreaker},
    config::{AgentConfig, CoreConfig},
    domain::AgentId,
    kinematics::state::REGIME_SLOTS,
    learner::{
        AgentParts, AgentProfile, ProbabilityPredictor, RegimeStats, TradeCounters, TradingAgent,
        predictor::CalibrationCell,
    },
    math::stats::finite_or,
    ring_buffer::RingBuffer,
};

/// Number of agents in a snapshot (patient, aggressive).
pub const AGENT_SLOTS: usize = 2;

// ================================================================================================
// Records
// ================================================================================================

/// Durable image of one regime's learned values and cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeRecord {
    pub q_buy: f64,
    pub q_sell: f64,
    pub q_hold: f64,
    pub trades: u32,
    pub wins: u32,
    pub pnl: f64,
    pub upside: f64,
    pub downside: f64,
    pub learning_rate: f64,
}

impl RegimeRecord {
    pub fn fresh(initial_learning_rate: f64) -> Self {
        Self::from(&RegimeStats::new(initial_learning_rate))
    }

    fn sanitize(&mut self, cfg: &AgentConfig) {
        self.q_buy = finite_or(self.q_buy, 0.0);
        self.q_sell = finite_or(self.q_sell, 0.0);
        self.q_hold = finite_or(self.q_hold, 0.0);
        self.pnl = finite_or(self.pnl, 0.0);
        self.upside = finite_or(self.upside, 0.0).max(0.0);
        self.downside = finite_or(self.downside, 0.0).max(0.0);
        self.wins = self.wins.min(self.trades);
        self.learning_rate = cfg.clamp_learning_rate(self.learning_rate);
    }
}

impl From<&RegimeStats> for RegimeRecord {
    fn from(stats: &RegimeStats) -> Self {
        Self {
            q_buy: stats.q_buy,
            q_sell: stats.q_sell,
            q_hold: stats.q_hold,
            trades: stats.cumulative.trades,
            wins: stats.cumulative.wins,
            pnl: stats.cumulative.pnl,
            upside: stats.cumulative.upside,
            downside: stats.cumulative.downside,
            learning_rate: stats.learning_rate,
        }
    }
}

impl From<&RegimeRecord> for RegimeStats {
    fn from(r: &RegimeRecord) -> Self {
        Self {
            q_buy: r.q_buy,
            q_sell: r.q_sell,
            q_hold: r.q_hold,
            cumulative: TradeCounters {
                trades: r.trades,
                wins: r.wins,
                pnl: r.pnl,
                upside: r.upside,
                downside: r.downside,
            },
            session: TradeCounters::default(),
            learning_rate: r.learning_rate,
        }
    }
}

pub type ProfileRecord = [RegimeRecord; REGIME_SLOTS];

fn profile_record(profile: &AgentProfile) -> ProfileRecord {
    let regimes = *profile.regimes();
    regimes.map(|r| RegimeRecord::from(&r))
}

fn profile_from_record(record: &ProfileRecord) -> AgentProfile {
    let record = *record;
    AgentProfile::from_regimes(record.map(|r| RegimeStats::from(&r)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub live: ProfileRecord,
    pub challenger: ProfileRecord,
    pub capital_allocation: f64,
    pub swap_count: u32,
    pub consecutive_losses: u32,
    pub risk_window: RingBuffer<f64>,
}

impl AgentRecord {
    pub fn fresh(cfg: &AgentConfig) -> Self {
        Self::from(&TradingAgent::new(AgentId::Patient, cfg.clone()))
    }

    /// Rebuilds the agent. A risk window persisted with a different capacity
    /// is re-sized, keeping the most recent entries.
    pub fn into_agent(self, id: AgentId, cfg: AgentConfig) -> TradingAgent {
        let risk_window = if self.risk_window.capacity() == cfg.rolling_window.max(1) {
            self.risk_window
        } else {
            let mut ring = RingBuffer::new(cfg.rolling_window);
            let recent: Vec<f64> = self.risk_window.iter().collect();
            recent.into_iter().rev().for_each(|pnl| ring.push(pnl));
            ring
        };
        let parts = AgentParts {
            live: profile_from_record(&self.live),
            challenger: profile_from_record(&self.challenger),
            risk_window,
            consecutive_losses: self.consecutive_losses,
            capital_allocation: self.capital_allocation,
            swap_count: self.swap_count,
        };
        TradingAgent::restore(id, cfg, parts)
    }

    fn sanitize(&mut self, cfg: &AgentConfig) {
        self.live
            .iter_mut()
            .chain(self.challenger.iter_mut())
            .for_each(|r| r.sanitize(cfg));

        self.capital_allocation = if self.capital_allocation.is_finite() {
            self.capital_allocation.clamp(0.0, 1.0)
        } else {
            cfg.capital_allocation.clamp(0.0, 1.0)
        };

        if self.risk_window.slots().iter().any(|x| !x.is_finite()) {
            let slots = self
                .risk_window
                .slots()
                .iter()
                .map(|x| finite_or(*x, 0.0))
                .collect();
            self.risk_window =
                RingBuffer::from_parts(slots, self.risk_window.head(), self.risk_window.len());
        }
    }
}

impl From<&TradingAgent> for AgentRecord {
    fn from(agent: &TradingAgent) -> Self {
        Self {
            live: profile_record(agent.live()),
            challenger: profile_record(agent.challenger()),
            capital_allocation: agent.capital_allocation(),
            swap_count: agent.swap_count(),
            consecutive_losses: agent.consecutive_losses(),
            risk_window: agent.risk_window().clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub status: BreakerStatus,
    pub peak_equity: f64,
}

impl From<&CircuitBreaker> for BreakerRecord {
    fn from(breaker: &CircuitBreaker) -> Self {
        Self {
            status: breaker.status(),
            peak_equity: breaker.peak_equity(),
        }
    }
}

// ================================================================================================
// Snapshot
// ================================================================================================

/// Durable image of all learned state.
///
/// Session counters, detector history and halt timestamps are not part of
/// the image; they are rebuilt at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub saved_at: DateTime<Utc>,
    /// Indexed by [`AgentId::index`].
    pub agents: [AgentRecord; AGENT_SLOTS],
    pub predictor: ProbabilityPredictor,
    pub breaker: BreakerRecord,
}

impl PersistedSnapshot {
    /// Default state for the given configuration: untrained agents, empty
    /// calibration tables and a live breaker.
    pub fn fresh(cfg: &CoreConfig, now: DateTime<Utc>) -> Self {
        Self {
            saved_at: now,
            agents: [
                AgentRecord::fresh(cfg.agent(AgentId::Patient)),
                AgentRecord::fresh(cfg.agent(AgentId::Aggressive)),
            ],
            predictor: ProbabilityPredictor::default(),
            breaker: BreakerRecord {
                status: BreakerStatus::Live,
                peak_equity: 0.0,
            },
        }
    }

    pub fn agent(&self, id: AgentId) -> &AgentRecord {
        &self.agents[id.index()]
    }

    /// Clamps every numeric field into its valid domain.
    pub fn sanitize(&mut self, cfg: &CoreConfig) {
        for id in AgentId::iter() {
            self.agents[id.index()].sanitize(cfg.agent(id));
        }

        let p = &mut self.predictor;
        p.regimes
            .iter_mut()
            .chain(p.chi_zones.iter_mut())
            .chain(p.accel_zones.iter_mut())
            .for_each(sanitize_cell);

        self.breaker.peak_equity = finite_or(self.breaker.peak_equity, 0.0).max(0.0);
    }
}

fn sanitize_cell(cell: &mut CalibrationCell) {
    cell.win_rate = if cell.win_rate.is_finite() {
        cell.win_rate.clamp(0.0, 1.0)
    } else {
        0.5
    };
}
