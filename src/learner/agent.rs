use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{
    config::AgentConfig,
    domain::{AgentId, TradeAction, TradeOutcome},
    kinematics::state::{LearningRegime, Regime},
    learner::profile::AgentProfile,
    math::stats::safe_div,
    ring_buffer::RingBuffer,
};

/// Live trades the incumbent policy needs before it can be replaced.
pub const MIN_LIVE_TRADES_FOR_PROMOTION: u32 = 10;

/// Floor applied to the live profit factor in the promotion comparison.
const LIVE_PROFIT_FACTOR_FLOOR: f64 = 0.01;

const EXPLORATION_ACTIONS: [TradeAction; 3] =
    [TradeAction::Buy, TradeAction::Sell, TradeAction::Hold];

// ================================================================================================
// Reward Shaping
// ================================================================================================

/// Turns realized P&L into a learning reward for one personality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentRewardShaper {
    loss_aversion: f64,
}

impl AgentRewardShaper {
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            loss_aversion: cfg.loss_aversion,
        }
    }

    /// Losses are weighted by the loss-aversion factor; non-finite P&L gives 0.
    pub fn reward(&self, net_pnl: f64) -> f64 {
        if !net_pnl.is_finite() {
            0.0
        } else if net_pnl < 0.0 {
            net_pnl * self.loss_aversion
        } else {
            net_pnl
        }
    }
}

// ================================================================================================
// Trading Agent
// ================================================================================================

/// One trading personality with a frozen live policy and a learning challenger.
#[derive(Debug, Clone, PartialEq)]
pub struct TradingAgent {
    id: AgentId,
    cfg: AgentConfig,
    live: AgentProfile,
    challenger: AgentProfile,
    /// Net P&L of recent live trades, newest first.
    risk_window: RingBuffer<f64>,
    consecutive_losses: u32,
    capital_allocation: f64,
    swap_count: u32,
    last_swap: Option<DateTime<Utc>>,
}

impl TradingAgent {
    pub fn new(id: AgentId, cfg: AgentConfig) -> Self {
        Self {
            id,
            live: AgentProfile::new(cfg.initial_learning_rate),
            challenger: AgentProfile::new(cfg.initial_learning_rate),
            risk_window: RingBuffer::new(cfg.rolling_window),
            consecutive_losses: 0,
            capital_allocation: cfg.capital_allocation.clamp(0.0, 1.0),
            swap_count: 0,
            last_swap: None,
            cfg,
        }
    }

    /// Rebuilds an agent from persisted parts.
    pub fn restore(id: AgentId, cfg: AgentConfig, parts: AgentParts) -> Self {
        Self {
            id,
            live: parts.live,
            challenger: parts.challenger,
            risk_window: parts.risk_window,
            consecutive_losses: parts.consecutive_losses,
            capital_allocation: parts.capital_allocation.clamp(0.0, 1.0),
            swap_count: parts.swap_count,
            last_swap: None,
            cfg,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn live(&self) -> &AgentProfile {
        &self.live
    }

    pub fn challenger(&self) -> &AgentProfile {
        &self.challenger
    }

    pub fn risk_window(&self) -> &RingBuffer<f64> {
        &self.risk_window
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn capital_allocation(&self) -> f64 {
        self.capital_allocation
    }

    pub fn swap_count(&self) -> u32 {
        self.swap_count
    }

    pub fn last_swap(&self) -> Option<DateTime<Utc>> {
        self.last_swap
    }

    pub fn reward_shaper(&self) -> AgentRewardShaper {
        AgentRewardShaper::new(&self.cfg)
    }

    /// Preference of this personality for the regime; 0 for `Calibrating`.
    pub fn affinity(&self, regime: Regime) -> f64 {
        regime
            .learning_regime()
            .map(|r| self.cfg.regime_affinity[r.index()])
            .unwrap_or(0.0)
    }

    // ============================================================================================
    // Learning
    // ============================================================================================

    /// Trains the challenger on one of its own closed trades.
    ///
    /// Records the P&L in the challenger's counters and updates the Q-value of
    /// `action`. Returns `false` if the update was ignored (`Calibrating`
    /// regime or non-finite input).
    pub fn update_trade(
        &mut self,
        regime: Regime,
        net_pnl: f64,
        reward: f64,
        action: TradeAction,
    ) -> bool {
        let Some(slot) = self.accept(regime, net_pnl, reward) else {
            return false;
        };
        self.challenger.record(slot, net_pnl);
        self.challenger.learn(slot, action, reward, &self.cfg);
        true
    }

    /// Records a trade that followed the live policy.
    ///
    /// Live counters and the risk window are updated and the challenger
    /// learns from the outcome off-policy. Live Q-values stay frozen.
    pub fn record_live_trade(
        &mut self,
        regime: Regime,
        net_pnl: f64,
        reward: f64,
        action: TradeAction,
    ) -> bool {
        let Some(slot) = self.accept(regime, net_pnl, reward) else {
            return false;
        };
        self.live.record(slot, net_pnl);
        self.challenger.learn(slot, action, reward, &self.cfg);

        self.risk_window.push(net_pnl);
        self.consecutive_losses = if net_pnl > 0.0 {
            0
        } else {
            self.consecutive_losses.saturating_add(1)
        };
        true
    }

    /// Routes a trade outcome by the policy that produced it.
    pub fn apply_outcome(&mut self, outcome: &TradeOutcome) -> bool {
        if outcome.was_live {
            self.record_live_trade(outcome.regime, outcome.net_pnl, outcome.reward, outcome.action)
        } else {
            self.update_trade(outcome.regime, outcome.net_pnl, outcome.reward, outcome.action)
        }
    }

    fn accept(&self, regime: Regime, net_pnl: f64, reward: f64) -> Option<LearningRegime> {
        let Some(slot) = regime.learning_regime() else {
            tracing::debug!(agent = %self.id, "Ignored trade update in calibrating regime");
            return None;
        };
        if !net_pnl.is_finite() || !reward.is_finite() {
            tracing::debug!(agent = %self.id, net_pnl, reward, "Ignored non-finite trade update");
            return None;
        }
        Some(slot)
    }

    // ============================================================================================
    // Promotion
    // ============================================================================================

    pub fn should_promote(&self) -> bool {
        if self.challenger.total_trades() < self.cfg.min_promotion_trades
            || self.live.total_trades() < MIN_LIVE_TRADES_FOR_PROMOTION
        {
            return false;
        }
        let bar = self.live.profit_factor().max(LIVE_PROFIT_FACTOR_FLOOR) * self.cfg.swap_threshold;
        self.challenger.profit_factor() > bar
    }

    /// Replaces the live policy with the challenger.
    ///
    /// The new challenger starts with zero trades but keeps the promoted
    /// Q-values.
    pub fn perform_swap(&mut self, now: DateTime<Utc>) {
        let promoted_pf = self.challenger.profit_factor();
        let retired_pf = self.live.profit_factor();

        self.live = self.challenger.clone();
        self.challenger = AgentProfile::seeded_from(&self.live, self.cfg.initial_learning_rate);
        self.swap_count = self.swap_count.saturating_add(1);
        self.last_swap = Some(now);

        tracing::info!(
            agent = %self.id,
            swaps = self.swap_count,
            promoted_profit_factor = promoted_pf,
            retired_profit_factor = retired_pf,
            "Challenger promoted to live"
        );
    }

    /// Promotes if [`Self::should_promote`] holds; otherwise a no-op.
    pub fn try_promote(&mut self, now: DateTime<Utc>) -> bool {
        if !self.should_promote() {
            return false;
        }
        self.perform_swap(now);
        true
    }

    // ============================================================================================
    // Action Selection
    // ============================================================================================

    /// Greedy live action; Hold while calibrating.
    pub fn select_action(&self, regime: Regime) -> TradeAction {
        regime
            .learning_regime()
            .map(|r| self.live.best_action(r))
            .unwrap_or_default()
    }

    /// Greedy challenger action; Hold while calibrating.
    pub fn challenger_action(&self, regime: Regime) -> TradeAction {
        regime
            .learning_regime()
            .map(|r| self.challenger.best_action(r))
            .unwrap_or_default()
    }

    /// Epsilon-greedy challenger action.
    pub fn explore_action<R: Rng + ?Sized>(&self, regime: Regime, rng: &mut R) -> TradeAction {
        if regime.learning_regime().is_none() {
            return TradeAction::Hold;
        }
        if rng.random_bool(self.cfg.exploration.clamp(0.0, 1.0)) {
            EXPLORATION_ACTIONS[rng.random_range(0..EXPLORATION_ACTIONS.len())]
        } else {
            self.challenger_action(regime)
        }
    }

    // ============================================================================================
    // Risk Signals & Sessions
    // ============================================================================================

    /// Win rate over the live risk window, once the window is full.
    pub fn rolling_win_rate(&self) -> Option<f64> {
        if !self.risk_window.is_full() {
            return None;
        }
        let wins = self.risk_window.iter().filter(|pnl| *pnl > 0.0).count();
        Some(safe_div(wins as f64, self.risk_window.len() as f64, 0.0))
    }

    pub fn reset_risk_window(&mut self) {
        self.risk_window.clear();
        self.consecutive_losses = 0;
    }

    pub fn start_session(&mut self) {
        self.live.reset_session();
        self.challenger.reset_session();
    }

    /// Copies the persistable parts of this agent.
    pub fn parts(&self) -> AgentParts {
        AgentParts {
            live: self.live.clone(),
            challenger: self.challenger.clone(),
            risk_window: self.risk_window.clone(),
            consecutive_losses: self.consecutive_losses,
            capital_allocation: self.capital_allocation,
            swap_count: self.swap_count,
        }
    }
}

/// Persistable state of a [`TradingAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct AgentParts {
    pub live: AgentProfile,
    pub challenger: AgentProfile,
    pub risk_window: RingBuffer<f64>,
    pub consecutive_losses: u32,
    pub capital_allocation: f64,
    pub swap_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{SeedableRng, rngs::StdRng};

    // ========================================================================
    // Test Setup & Helpers
    // ========================================================================

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn agent() -> TradingAgent {
        TradingAgent::new(
            AgentId::Aggressive,
            AgentConfig::aggressive().with_promotion(10, 1.2),
        )
    }

    /// Live: 20 trades, PF 1.0. Challenger: 15 trades, PF 1.6.
    fn promotable_agent() -> TradingAgent {
        let mut a = agent();
        for i in 0..20 {
            let pnl = if i % 2 == 0 { 1.0 } else { -1.0 };
            assert!(a.record_live_trade(Regime::Trend, pnl, pnl, TradeAction::Buy));
        }
        for i in 0..15 {
            let pnl = if i < 5 { 3.2 } else { -1.0 };
            assert!(a.update_trade(Regime::Trend, pnl, pnl, TradeAction::Buy));
        }
        a
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    #[test]
    fn promotion_scenario() {
        let mut a = promotable_agent();
        assert!((a.live().profit_factor() - 1.0).abs() < 1e-12);
        assert!((a.challenger().profit_factor() - 1.6).abs() < 1e-9);
        assert!(a.should_promote());

        let q_before = a.challenger().regime(LearningRegime::Trend).q_buy;
        a.perform_swap(now());

        assert_eq!(a.live().total_trades(), 15);
        assert_eq!(a.challenger().total_trades(), 0);
        assert_eq!(a.challenger().regime(LearningRegime::Trend).q_buy, q_before);
        assert_eq!(a.swap_count(), 1);
        assert_eq!(a.last_swap(), Some(now()));
    }

    #[test]
    fn promotion_is_a_noop_when_condition_is_false() {
        let mut a = agent();
        a.record_live_trade(Regime::Trend, 1.0, 1.0, TradeAction::Buy);
        a.update_trade(Regime::Trend, 1.0, 1.0, TradeAction::Buy);
        let before = a.clone();

        assert!(!a.should_promote());
        assert!(!a.try_promote(now()));
        assert_eq!(a, before);
    }

    #[test]
    fn promotion_requires_live_sample() {
        let mut a = agent();
        for _ in 0..15 {
            a.update_trade(Regime::MeanRev, 2.0, 2.0, TradeAction::Sell);
        }
        assert!(!a.should_promote());
    }

    // ========================================================================
    // Learning
    // ========================================================================

    #[test]
    fn learning_rate_is_non_increasing_and_bounded() {
        let cfg = AgentConfig::patient();
        let mut a = TradingAgent::new(AgentId::Patient, cfg.clone());
        let mut rng = StdRng::seed_from_u64(42);

        let mut previous = cfg.initial_learning_rate;
        for _ in 0..1_000 {
            let pnl = rng.random_range(-10.0..10.0);
            let action = if rng.random_bool(0.5) {
                TradeAction::Buy
            } else {
                TradeAction::Sell
            };
            a.update_trade(Regime::Critical, pnl, pnl, action);

            let lr = a.challenger().regime(LearningRegime::Critical).learning_rate;
            assert!(lr <= previous);
            assert!(lr >= cfg.learning_rate_floor && lr <= cfg.initial_learning_rate);
            previous = lr;
        }
        assert_eq!(previous, cfg.learning_rate_floor);
    }

    #[test]
    fn live_q_values_stay_frozen() {
        let mut a = agent();
        let outcome = TradeOutcome {
            regime: Regime::Breakout,
            net_pnl: 5.0,
            reward: 5.0,
            action: TradeAction::Buy,
            agent_id: AgentId::Aggressive,
            was_live: true,
            features: None,
        };
        assert!(a.apply_outcome(&outcome));

        assert_eq!(a.live().regime(LearningRegime::Trend).q_buy, 0.0);
        assert_eq!(a.live().total_trades(), 1);
        assert_eq!(a.challenger().total_trades(), 0);
        assert!(a.challenger().regime(LearningRegime::Trend).q_buy > 0.0);

        let shadow = TradeOutcome {
            was_live: false,
            ..outcome
        };
        assert!(a.apply_outcome(&shadow));
        assert_eq!(a.live().total_trades(), 1);
        assert_eq!(a.challenger().total_trades(), 1);
    }

    #[test]
    fn calibrating_and_non_finite_updates_are_ignored() {
        let mut a = agent();
        assert!(!a.update_trade(Regime::Calibrating, 1.0, 1.0, TradeAction::Buy));
        assert!(!a.update_trade(Regime::Trend, f64::NAN, 1.0, TradeAction::Buy));
        assert!(!a.update_trade(Regime::Trend, 1.0, f64::INFINITY, TradeAction::Buy));
        assert_eq!(a.challenger().total_trades(), 0);
    }

    // ========================================================================
    // Action Selection & Risk
    // ========================================================================

    #[test]
    fn exploration_is_deterministic_with_seeded_rng() {
        let a = TradingAgent::new(
            AgentId::Patient,
            AgentConfig::patient().with_exploration(1.0),
        );
        let mut r1 = StdRng::seed_from_u64(3);
        let mut r2 = StdRng::seed_from_u64(3);
        let xs: Vec<_> = (0..20).map(|_| a.explore_action(Regime::Trend, &mut r1)).collect();
        let ys: Vec<_> = (0..20).map(|_| a.explore_action(Regime::Trend, &mut r2)).collect();
        assert_eq!(xs, ys);
        assert_eq!(a.explore_action(Regime::Calibrating, &mut r1), TradeAction::Hold);
    }

    #[test]
    fn risk_window_tracks_streaks_and_rolling_rate() {
        let mut a = TradingAgent::new(
            AgentId::Patient,
            AgentConfig::patient().with_rolling_window(4),
        );
        for pnl in [1.0, -1.0, -1.0, -1.0] {
            a.record_live_trade(Regime::Trend, pnl, pnl, TradeAction::Sell);
        }
        assert_eq!(a.consecutive_losses(), 3);
        assert_eq!(a.rolling_win_rate(), Some(0.25));

        a.reset_risk_window();
        assert_eq!(a.consecutive_losses(), 0);
        assert_eq!(a.rolling_win_rate(), None);
    }

    #[test]
    fn reward_shaper_penalizes_losses() {
        let shaper = AgentRewardShaper::new(&AgentConfig::patient());
        assert_eq!(shaper.reward(2.0), 2.0);
        assert_eq!(shaper.reward(-2.0), -3.0);
        assert_eq!(shaper.reward(f64::NAN), 0.0);
    }
}
