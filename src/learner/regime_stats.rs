use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{config::AgentConfig, domain::TradeAction, math::stats::safe_div};

/// Weight of the reward error in the surprise boost.
const SURPRISE_SCALE: f64 = 0.1;

/// Profit factor reported when there are gains but no losses.
pub const PROFIT_FACTOR_CAP: f64 = 10.0;

// ================================================================================================
// Trade Counters
// ================================================================================================

/// Trade/win counts and P&L sums over some period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeCounters {
    pub trades: u32,
    pub wins: u32,
    pub pnl: f64,
    /// Sum of winning P&L.
    pub upside: f64,
    /// Sum of losing P&L magnitudes.
    pub downside: f64,
}

impl TradeCounters {
    pub fn record(&mut self, net_pnl: f64) {
        self.trades = self.trades.saturating_add(1);
        self.pnl += net_pnl;
        if net_pnl > 0.0 {
            self.wins = self.wins.saturating_add(1);
            self.upside += net_pnl;
        } else {
            self.downside += -net_pnl;
        }
    }

    pub fn win_rate(&self) -> f64 {
        safe_div(self.wins as f64, self.trades as f64, 0.0)
    }

    /// Upside over downside; 0 without upside, [`PROFIT_FACTOR_CAP`] without downside.
    pub fn profit_factor(&self) -> f64 {
        if self.upside <= 0.0 || self.upside.is_nan() {
            return 0.0;
        }
        if self.downside <= 0.0 || self.downside.is_nan() {
            return PROFIT_FACTOR_CAP;
        }
        safe_div(self.upside, self.downside, 0.0).min(PROFIT_FACTOR_CAP)
    }

    /// Element-wise sum, used to derive profile totals.
    pub fn merge(self, other: &Self) -> Self {
        Self {
            trades: self.trades.saturating_add(other.trades),
            wins: self.wins.saturating_add(other.wins),
            pnl: self.pnl + other.pnl,
            upside: self.upside + other.upside,
            downside: self.downside + other.downside,
        }
    }
}

// ================================================================================================
// Regime Statistics
// ================================================================================================

/// Q-values, counters and adaptive learning rate of one learning regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub q_buy: f64,
    pub q_sell: f64,
    /// Neutral fallback value; never learned.
    pub q_hold: f64,
    pub cumulative: TradeCounters,
    pub session: TradeCounters,
    pub learning_rate: f64,
}

impl RegimeStats {
    pub fn new(initial_learning_rate: f64) -> Self {
        Self {
            q_buy: 0.0,
            q_sell: 0.0,
            q_hold: 0.0,
            cumulative: TradeCounters::default(),
            session: TradeCounters::default(),
            learning_rate: initial_learning_rate,
        }
    }

    /// Fresh statistics that keep the Q-values of `other`.
    pub fn seeded_from(other: &Self, initial_learning_rate: f64) -> Self {
        Self {
            q_buy: other.q_buy,
            q_sell: other.q_sell,
            q_hold: other.q_hold,
            ..Self::new(initial_learning_rate)
        }
    }

    pub fn q(&self, action: TradeAction) -> f64 {
        match action {
            TradeAction::Buy => self.q_buy,
            TradeAction::Sell => self.q_sell,
            TradeAction::Hold => self.q_hold,
        }
    }

    pub fn record(&mut self, net_pnl: f64) {
        self.cumulative.record(net_pnl);
        self.session.record(net_pnl);
    }

    /// Step size for a given reward: the floored learning rate scaled by a
    /// bounded surprise boost, never above the initial rate.
    pub fn step_size(&self, action: TradeAction, reward: f64, cfg: &AgentConfig) -> f64 {
        let base = self.learning_rate.max(cfg.learning_rate_floor);
        let surprise = (reward - self.q(action)).abs();
        let boost = (1.0 + surprise * SURPRISE_SCALE).min(cfg.max_surprise_boost);
        (base * boost).min(cfg.initial_learning_rate)
    }

    /// Incremental Q-update `Q <- Q + a(reward - Q)` followed by learning-rate decay.
    ///
    /// Hold is not learned, so a Hold update leaves the regime untouched and
    /// returns `false`.
    pub fn learn(&mut self, action: TradeAction, reward: f64, cfg: &AgentConfig) -> bool {
        if !reward.is_finite() {
            return false;
        }
        let alpha = self.step_size(action, reward, cfg);
        let q = match action {
            TradeAction::Buy => &mut self.q_buy,
            TradeAction::Sell => &mut self.q_sell,
            TradeAction::Hold => return false,
        };
        *q += alpha * (reward - *q);

        self.learning_rate = cfg.clamp_learning_rate(self.learning_rate * cfg.learning_rate_decay);
        true
    }

    /// Greedy action over Buy/Sell, falling back to Hold only when Hold is
    /// strictly better. Ties between Buy and Sell go to Buy.
    pub fn best_action(&self) -> TradeAction {
        let candidates = [
            (TradeAction::Buy, self.q_buy),
            (TradeAction::Sell, self.q_sell),
        ];
        let (action, q) = candidates
            .into_iter()
            .rev()
            .max_by_key(|(_, q)| OrderedFloat(*q))
            .unwrap_or((TradeAction::Hold, self.q_hold));
        if self.q_hold > q { TradeAction::Hold } else { action }
    }

    pub fn win_rate(&self) -> f64 {
        self.cumulative.win_rate()
    }

    pub fn profit_factor(&self) -> f64 {
        self.cumulative.profit_factor()
    }
}
