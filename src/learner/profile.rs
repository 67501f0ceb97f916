use serde::{Deserialize, Serialize};

use crate::{
    config::AgentConfig,
    domain::TradeAction,
    kinematics::state::{LearningRegime, REGIME_SLOTS},
    learner::regime_stats::{RegimeStats, TradeCounters},
};

/// Per-regime statistics of one policy plus totals derived from them.
///
/// The totals are never mutated on their own: every change goes through a
/// method that updates a regime entry and then re-sums all regimes, so
/// `totals == Σ regimes` holds after every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    regimes: [RegimeStats; REGIME_SLOTS],
    totals: TradeCounters,
    session_totals: TradeCounters,
}

impl AgentProfile {
    pub fn new(initial_learning_rate: f64) -> Self {
        Self::from_regimes([RegimeStats::new(initial_learning_rate); REGIME_SLOTS])
    }

    pub fn from_regimes(regimes: [RegimeStats; REGIME_SLOTS]) -> Self {
        let mut profile = Self {
            regimes,
            totals: TradeCounters::default(),
            session_totals: TradeCounters::default(),
        };
        profile.recompute_totals();
        profile
    }

    /// Zero-trade profile that carries over the Q-values of `other`.
    pub fn seeded_from(other: &Self, initial_learning_rate: f64) -> Self {
        Self::from_regimes(
            other
                .regimes
                .map(|r| RegimeStats::seeded_from(&r, initial_learning_rate)),
        )
    }

    pub fn regime(&self, regime: LearningRegime) -> &RegimeStats {
        &self.regimes[regime.index()]
    }

    pub fn regimes(&self) -> &[RegimeStats; REGIME_SLOTS] {
        &self.regimes
    }

    pub fn totals(&self) -> &TradeCounters {
        &self.totals
    }

    pub fn session_totals(&self) -> &TradeCounters {
        &self.session_totals
    }

    pub fn total_trades(&self) -> u32 {
        self.totals.trades
    }

    pub fn win_rate(&self) -> f64 {
        self.totals.win_rate()
    }

    pub fn profit_factor(&self) -> f64 {
        self.totals.profit_factor()
    }

    pub fn best_action(&self, regime: LearningRegime) -> TradeAction {
        self.regime(regime).best_action()
    }

    /// Records a closed trade's P&L.
    pub fn record(&mut self, regime: LearningRegime, net_pnl: f64) {
        self.regimes[regime.index()].record(net_pnl);
        self.recompute_totals();
    }

    /// Applies a Q-update; see [`RegimeStats::learn`].
    pub fn learn(
        &mut self,
        regime: LearningRegime,
        action: TradeAction,
        reward: f64,
        cfg: &AgentConfig,
    ) -> bool {
        self.regimes[regime.index()].learn(action, reward, cfg)
    }

    pub fn reset_session(&mut self) {
        self.regimes
            .iter_mut()
            .for_each(|r| r.session = TradeCounters::default());
        self.recompute_totals();
    }

    fn recompute_totals(&mut self) {
        let (totals, session) = self.regimes.iter().fold(
            (TradeCounters::default(), TradeCounters::default()),
            |(t, s), r| (t.merge(&r.cumulative), s.merge(&r.session)),
        );
        self.totals = totals;
        self.session_totals = session;
    }
}
