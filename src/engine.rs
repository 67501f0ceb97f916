//! The decision core: a caller-owned aggregate wiring detector, learner, edge
//! gate and circuit breaker into one tick-driven flow.
//!
//! ```text
//! tick ─▶ DetectorBank ─▶ KinematicState
//!                              │
//!          evaluate ◀──────────┘ ─▶ TradingAgent / Predictor ─▶ EdgeGate + CircuitBreaker ─▶ Decision
//!
//! outcome ─▶ TradingAgent (learn, promote) ─▶ Predictor ─▶ CircuitBreaker (re-check)
//! ```
//!
//! All mutation goes through `&mut self`; there is no interior mutability and
//! no global state. Persistence reads a copy produced by [`DecisionCore::snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    breaker::{BreakerStatus, CircuitBreaker, RiskSignals},
    config::CoreConfig,
    domain::{
        AgentId, EntryFeatures, Equity, InstrumentId, Price, TradeAction, TradeOutcome, Volatility,
    },
    edge::{EdgeGate, EdgeSample},
    error::CoreResult,
    kinematics::{DetectorBank, KinematicState, Regime},
    learner::{ProbabilityPredictor, TradingAgent},
    math::stats::safe_div,
    persistence::snapshot::{AGENT_SLOTS, AgentRecord, BreakerRecord, PersistedSnapshot},
    report::{AgentStatistics, CoreStatistics},
};

// ================================================================================================
// Decision
// ================================================================================================

/// What a collaborator may do with the proposed action.
#[derive(
    Copy,
    Clone,
    Debug,
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
pub enum Authorization {
    /// Capital may be put at risk.
    Live,
    /// The action may be simulated but not executed with capital.
    ShadowOnly,
    /// Nothing may be traded, not even in simulation.
    Blocked,
}

/// Result of one evaluation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub instrument: InstrumentId,
    pub regime: Regime,
    /// Personality with the strongest affinity for the regime.
    pub agent: AgentId,
    /// Greedy action of the agent's live policy.
    pub action: TradeAction,
    /// Greedy action of the agent's challenger policy.
    pub challenger_action: TradeAction,
    pub win_probability: f64,
    pub has_edge: bool,
    pub authorization: Authorization,
    /// Features to attach to the resulting [`TradeOutcome`].
    pub features: EntryFeatures,
}

impl Decision {
    pub fn is_live(&self) -> bool {
        self.authorization == Authorization::Live
    }
}

// ================================================================================================
// Decision Core
// ================================================================================================

#[derive(Debug, Clone)]
pub struct DecisionCore {
    cfg: CoreConfig,
    detectors: DetectorBank,
    /// Indexed by [`AgentId::index`].
    agents: [TradingAgent; AGENT_SLOTS],
    predictor: ProbabilityPredictor,
    edge: EdgeGate,
    breaker: CircuitBreaker,
}

impl DecisionCore {
    /// Fresh core with untrained agents and a live breaker.
    pub fn new(cfg: CoreConfig) -> CoreResult<Self> {
        cfg.validate()?;
        Ok(Self {
            detectors: DetectorBank::new(cfg.detector.clone()),
            agents: [
                TradingAgent::new(AgentId::Patient, cfg.patient.clone()),
                TradingAgent::new(AgentId::Aggressive, cfg.aggressive.clone()),
            ],
            predictor: ProbabilityPredictor::default(),
            edge: EdgeGate::new(cfg.edge.clone()),
            breaker: CircuitBreaker::new(cfg.breaker.clone()),
            cfg,
        })
    }

    /// Rebuilds a core from persisted learned state.
    ///
    /// Detectors start empty and recalibrate from the tick feed.
    pub fn restore(
        cfg: CoreConfig,
        snapshot: PersistedSnapshot,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        cfg.validate()?;
        let PersistedSnapshot {
            agents: [patient, aggressive],
            predictor,
            breaker,
            ..
        } = snapshot;

        tracing::info!(
            status = %breaker.status,
            peak_equity = breaker.peak_equity,
            "Restoring decision core"
        );

        Ok(Self {
            detectors: DetectorBank::new(cfg.detector.clone()),
            agents: [
                patient.into_agent(AgentId::Patient, cfg.patient.clone()),
                aggressive.into_agent(AgentId::Aggressive, cfg.aggressive.clone()),
            ],
            predictor,
            edge: EdgeGate::new(cfg.edge.clone()),
            breaker: CircuitBreaker::restore(
                cfg.breaker.clone(),
                breaker.status,
                breaker.peak_equity,
                now,
            ),
            cfg,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn detectors(&self) -> &DetectorBank {
        &self.detectors
    }

    pub fn agent(&self, id: AgentId) -> &TradingAgent {
        &self.agents[id.index()]
    }

    pub fn agents(&self) -> &[TradingAgent; AGENT_SLOTS] {
        &self.agents
    }

    pub fn predictor(&self) -> &ProbabilityPredictor {
        &self.predictor
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    pub fn state(&self, instrument: &InstrumentId) -> KinematicState {
        self.detectors.state(instrument)
    }

    // ============================================================================================
    // Inputs
    // ============================================================================================

    /// Feeds one observation; `None` if it was rejected.
    pub fn on_tick(
        &mut self,
        instrument: &InstrumentId,
        price: Price,
        volatility: Volatility,
    ) -> Option<KinematicState> {
        self.detectors.update(instrument, price, volatility)
    }

    /// Books account equity and re-evaluates the breaker.
    pub fn on_equity(&mut self, now: DateTime<Utc>, equity: Equity) -> BreakerStatus {
        let signals = self.risk_signals();
        self.breaker.check(now, Some(equity), signals)
    }

    /// Re-evaluates time-driven breaker transitions without new equity.
    pub fn poll(&mut self, now: DateTime<Utc>) -> BreakerStatus {
        let signals = self.risk_signals();
        self.breaker.check(now, None, signals)
    }

    /// Applies a closed trade.
    ///
    /// 1. The owning agent learns from it (live or challenger attribution).
    /// 2. The predictor records the result.
    /// 3. Challenger trades feed the breaker's probation sample.
    /// 4. A promotion is attempted.
    /// 5. The breaker is re-checked against the agents' risk signals.
    ///
    /// Returns `false` if the outcome was ignored.
    #[tracing::instrument(
        skip(self, outcome),
        fields(agent = %outcome.agent_id, live = outcome.was_live)
    )]
    pub fn on_trade_outcome(&mut self, now: DateTime<Utc>, outcome: TradeOutcome) -> bool {
        let agent = &mut self.agents[outcome.agent_id.index()];
        if !agent.apply_outcome(&outcome) {
            return false;
        }

        self.predictor
            .record(outcome.regime, outcome.features, outcome.is_win());

        if !outcome.was_live && self.breaker.record_retraining_trade(outcome.net_pnl) {
            tracing::debug!(
                trades = self.breaker.retraining().trades,
                "Probation trade recorded"
            );
        }

        self.agents[outcome.agent_id.index()].try_promote(now);
        self.poll(now);
        true
    }

    /// Manual approval to resume live trading. Agent risk windows restart
    /// empty so that stale losses cannot trip the breaker again immediately.
    pub fn reinstate(&mut self, now: DateTime<Utc>) -> bool {
        if !self.breaker.reinstate(now) {
            return false;
        }
        self.agents.iter_mut().for_each(TradingAgent::reset_risk_window);
        true
    }

    pub fn force_halt(&mut self, now: DateTime<Utc>, reason: &str) {
        self.breaker.force_halt(now, reason);
    }

    /// Resets the session counters of every profile.
    pub fn start_session(&mut self) {
        self.agents.iter_mut().for_each(TradingAgent::start_session);
    }

    pub fn can_trade_live(&self) -> bool {
        self.breaker.can_trade_live()
    }

    pub fn can_trade_challenger(&self, now: DateTime<Utc>) -> bool {
        self.breaker.can_trade_challenger(now)
    }

    // ============================================================================================
    // Evaluation
    // ============================================================================================

    /// Proposes an action for the instrument and decides how far it may go.
    ///
    /// - `Blocked` while the instrument is calibrating or the breaker permits
    ///   no trading at all.
    /// - `Live` when the breaker permits live trading, the live policy has a
    ///   statistical edge in the regime and its action is not Hold.
    /// - `ShadowOnly` otherwise.
    pub fn evaluate(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> Decision {
        let state = self.detectors.state(instrument);
        let regime = state.regime;
        let agent = &self.agents[self.select_agent(regime).index()];

        let action = agent.select_action(regime);
        let challenger_action = agent.challenger_action(regime);
        let features = EntryFeatures {
            chi_z: state.chi_z,
            accel_z: state.accel_z,
        };
        let win_probability = self.predictor.win_probability(regime, Some(features));
        let has_edge = self.live_edge(agent, regime);

        let authorization = if regime.is_calibrating() || !self.breaker.can_trade_challenger(now) {
            Authorization::Blocked
        } else if self.breaker.can_trade_live() && has_edge && action != TradeAction::Hold {
            Authorization::Live
        } else {
            Authorization::ShadowOnly
        };

        Decision {
            instrument: instrument.clone(),
            regime,
            agent: agent.id(),
            action,
            challenger_action,
            win_probability,
            has_edge,
            authorization,
            features,
        }
    }

    /// Agent with the highest affinity for the regime; ties go to Patient.
    pub fn select_agent(&self, regime: Regime) -> AgentId {
        let patient = self.agents[AgentId::Patient.index()].affinity(regime);
        let aggressive = self.agents[AgentId::Aggressive.index()].affinity(regime);
        if aggressive > patient {
            AgentId::Aggressive
        } else {
            AgentId::Patient
        }
    }

    /// Edge gate over the live profile's statistics for the regime.
    fn live_edge(&self, agent: &TradingAgent, regime: Regime) -> bool {
        let Some(slot) = regime.learning_regime() else {
            return false;
        };
        let c = &agent.live().regime(slot).cumulative;
        let losses = c.trades.saturating_sub(c.wins);
        self.edge.has_edge(&EdgeSample {
            wins: c.wins,
            total: c.trades,
            avg_win: safe_div(c.upside, c.wins as f64, 0.0),
            avg_loss: safe_div(c.downside, losses as f64, 0.0),
            avg_friction: self.cfg.edge.avg_friction,
        })
    }

    /// Worst risk signals over both agents' live windows.
    pub fn risk_signals(&self) -> RiskSignals {
        self.agents
            .iter()
            .map(|a| RiskSignals {
                consecutive_losses: a.consecutive_losses(),
                rolling_win_rate: a.rolling_win_rate(),
            })
            .fold(RiskSignals::default(), RiskSignals::worst)
    }

    // ============================================================================================
    // Outputs
    // ============================================================================================

    pub fn statistics(&self) -> CoreStatistics {
        CoreStatistics {
            instruments: self.detectors.len(),
            predictor_samples: self.predictor.total_samples(),
            breaker: (&self.breaker).into(),
            agents: self.agents.iter().map(AgentStatistics::from).collect(),
        }
    }

    /// Copies all learned state into a persistable image.
    pub fn snapshot(&self, now: DateTime<Utc>) -> PersistedSnapshot {
        PersistedSnapshot {
            saved_at: now,
            agents: [
                AgentRecord::from(&self.agents[AgentId::Patient.index()]),
                AgentRecord::from(&self.agents[AgentId::Aggressive.index()]),
            ],
            predictor: self.predictor.clone(),
            breaker: BreakerRecord::from(&self.breaker),
        }
    }
}
