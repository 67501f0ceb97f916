//! Circuit breaker: the process-wide safety governor.
//!
//! ```text
//!   Live ──breach / force──▶ Halted ──cooldown──▶ Retraining ──probation──▶ Pending
//!    ▲                                                                         │
//!    └──────────────────────────── reinstate (manual) ─────────────────────────┘
//! ```
//!
//! A manual force-halt is accepted from every state. Pending never returns to
//! Live on its own.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    config::BreakerConfig,
    domain::Equity,
    learner::regime_stats::TradeCounters,
    math::stats::safe_div,
};

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
pub enum BreakerStatus {
    /// Normal operation; live and challenger trading permitted.
    #[default]
    Live,
    /// A breach was detected; cooling down.
    Halted,
    /// Challenger-only trading while a probation sample accumulates.
    Retraining,
    /// Probation passed; awaiting manual reinstatement.
    Pending,
}

impl BreakerStatus {
    /// Stable integer code used by the snapshot format.
    pub fn code(self) -> i32 {
        match self {
            Self::Live => 0,
            Self::Halted => 1,
            Self::Retraining => 2,
            Self::Pending => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Live),
            1 => Some(Self::Halted),
            2 => Some(Self::Retraining),
            3 => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted)
    }
}

/// Performance signals derived from the agents' live risk windows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiskSignals {
    pub consecutive_losses: u32,
    /// `None` until a risk window is full.
    pub rolling_win_rate: Option<f64>,
}

impl RiskSignals {
    /// Keeps the worse of both signals.
    pub fn worst(self, other: Self) -> Self {
        let rolling_win_rate = match (self.rolling_win_rate, other.rolling_win_rate) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            consecutive_losses: self.consecutive_losses.max(other.consecutive_losses),
            rolling_win_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltRecord {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    status: BreakerStatus,
    halt: Option<HaltRecord>,

    /// Probation sample, reset on every halt.
    retraining: TradeCounters,

    day: Option<NaiveDate>,
    day_start_equity: Option<f64>,
    daily_pnl: f64,
    last_equity: Option<f64>,
    peak_equity: f64,
    drawdown: f64,
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            status: BreakerStatus::Live,
            halt: None,
            retraining: TradeCounters::default(),
            day: None,
            day_start_equity: None,
            daily_pnl: 0.0,
            last_equity: None,
            peak_equity: 0.0,
            drawdown: 0.0,
        }
    }

    /// Rebuilds the breaker from a persisted status and peak equity.
    ///
    /// A restored `Halted` state restarts its cooldown at `now`.
    pub fn restore(
        cfg: BreakerConfig,
        status: BreakerStatus,
        peak_equity: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let mut breaker = Self::new(cfg);
        breaker.status = status;
        breaker.peak_equity = if peak_equity.is_finite() {
            peak_equity.max(0.0)
        } else {
            0.0
        };
        if status.is_halted() {
            breaker.halt = Some(HaltRecord {
                at: now,
                reason: "restored in halted state".to_string(),
            });
        }
        breaker
    }

    pub fn status(&self) -> BreakerStatus {
        self.status
    }

    pub fn halt_record(&self) -> Option<&HaltRecord> {
        self.halt.as_ref()
    }

    pub fn retraining(&self) -> &TradeCounters {
        &self.retraining
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn drawdown(&self) -> f64 {
        self.drawdown
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.cfg
    }

    pub fn can_trade_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn can_trade_challenger(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            BreakerStatus::Live | BreakerStatus::Retraining | BreakerStatus::Pending => true,
            BreakerStatus::Halted => self.cooldown_elapsed(now),
        }
    }

    // ============================================================================================
    // State Machine
    // ============================================================================================

    /// Runs bookkeeping and evaluates automatic transitions.
    ///
    /// Equity bookkeeping runs in every state. A missing or invalid equity
    /// skips bookkeeping and the equity-based breach tests.
    pub fn check(
        &mut self,
        now: DateTime<Utc>,
        equity: Option<Equity>,
        signals: RiskSignals,
    ) -> BreakerStatus {
        let equity = equity.and_then(|e| e.checked());
        if let Some(eq) = equity {
            self.book_equity(now, eq);
        }

        match self.status {
            BreakerStatus::Live => {
                if let Some(reason) = self.breach(equity.is_some(), signals) {
                    self.halt(now, reason);
                }
            }
            BreakerStatus::Halted => {
                if self.cooldown_elapsed(now) {
                    self.transition(BreakerStatus::Retraining);
                }
            }
            BreakerStatus::Retraining => {
                if self.probation_passed() {
                    self.transition(BreakerStatus::Pending);
                }
            }
            BreakerStatus::Pending => {}
        }
        self.status
    }

    /// Adds a challenger trade to the probation sample. Ignored outside Retraining.
    pub fn record_retraining_trade(&mut self, net_pnl: f64) -> bool {
        if self.status != BreakerStatus::Retraining || !net_pnl.is_finite() {
            return false;
        }
        self.retraining.record(net_pnl);
        true
    }

    /// Manual approval: Pending -> Live. Rejected from any other state.
    ///
    /// Peak and day-start equity are rebased to the last observed equity. When
    /// none has been observed since restart, the next equity report seeds them.
    #[tracing::instrument(skip(self), fields(status = %self.status))]
    pub fn reinstate(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != BreakerStatus::Pending {
            tracing::warn!("Reinstatement rejected");
            return false;
        }
        match self.last_equity {
            Some(eq) => {
                self.peak_equity = eq;
                self.day_start_equity = Some(eq);
                self.day = Some(now.date_naive());
            }
            None => {
                self.peak_equity = 0.0;
                self.day_start_equity = None;
                self.day = None;
            }
        }
        self.daily_pnl = 0.0;
        self.drawdown = 0.0;
        self.halt = None;
        self.transition(BreakerStatus::Live);
        true
    }

    /// Manual override: any state -> Halted.
    #[tracing::instrument(skip(self), fields(status = %self.status))]
    pub fn force_halt(&mut self, now: DateTime<Utc>, reason: &str) {
        self.halt(now, format!("manual halt: {reason}"));
    }

    fn halt(&mut self, now: DateTime<Utc>, reason: String) {
        tracing::warn!(from = %self.status, reason = %reason, "Circuit breaker halted");
        self.status = BreakerStatus::Halted;
        self.retraining = TradeCounters::default();
        self.halt = Some(HaltRecord { at: now, reason });
    }

    fn transition(&mut self, to: BreakerStatus) {
        tracing::info!(from = %self.status, to = %to, "Circuit breaker transition");
        if to == BreakerStatus::Retraining {
            self.retraining = TradeCounters::default();
        }
        self.status = to;
    }

    // ============================================================================================
    // Rules
    // ============================================================================================

    fn book_equity(&mut self, now: DateTime<Utc>, equity: f64) {
        let today = now.date_naive();
        if self.day != Some(today) || self.day_start_equity.is_none() {
            self.day = Some(today);
            self.day_start_equity = Some(equity);
        }
        let day_start = self.day_start_equity.unwrap_or(equity);

        self.daily_pnl = equity - day_start;
        self.peak_equity = self.peak_equity.max(equity);
        self.drawdown = safe_div(self.peak_equity - equity, self.peak_equity, 0.0).max(0.0);
        self.last_equity = Some(equity);
    }

    fn breach(&self, fresh_equity: bool, signals: RiskSignals) -> Option<String> {
        let cfg = &self.cfg;

        if fresh_equity {
            let day_start = self.day_start_equity.unwrap_or(0.0);
            let daily_loss = safe_div(-self.daily_pnl, day_start, 0.0);
            if daily_loss > cfg.max_daily_loss_ratio {
                return Some(format!(
                    "daily loss {:.2}% exceeds limit {:.2}%",
                    daily_loss * 100.0,
                    cfg.max_daily_loss_ratio * 100.0
                ));
            }
            if self.drawdown > cfg.max_drawdown {
                return Some(format!(
                    "drawdown {:.2}% exceeds limit {:.2}%",
                    self.drawdown * 100.0,
                    cfg.max_drawdown * 100.0
                ));
            }
        }

        if signals.consecutive_losses >= cfg.max_consecutive_losses {
            return Some(format!(
                "{} consecutive losses reached limit {}",
                signals.consecutive_losses, cfg.max_consecutive_losses
            ));
        }
        if let Some(wr) = signals.rolling_win_rate {
            if wr < cfg.min_rolling_win_rate {
                return Some(format!(
                    "rolling win rate {:.1}% below minimum {:.1}%",
                    wr * 100.0,
                    cfg.min_rolling_win_rate * 100.0
                ));
            }
        }
        None
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        let Some(halt) = &self.halt else {
            return false;
        };
        let cooldown = TimeDelta::try_minutes(self.cfg.cooldown_minutes).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(halt.at) >= cooldown
    }

    fn probation_passed(&self) -> bool {
        let r = &self.retraining;
        r.trades >= self.cfg.retrain_min_trades
            && r.win_rate() >= self.cfg.retrain_min_win_rate
            && r.profit_factor() >= self.cfg.retrain_min_profit_factor
    }
}
