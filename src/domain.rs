use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::{impl_finite_positive, impl_from_primitive, kinematics::state::Regime};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Represents a price level in the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(pub f64);
impl_from_primitive!(Price, f64);
impl_finite_positive!(Price);

/// A volatility estimate (e.g. ATR) in price units, used to normalize price deltas.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Volatility(pub f64);
impl_from_primitive!(Volatility, f64);
impl_finite_positive!(Volatility);

/// Account equity in account currency, as reported by account telemetry.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Equity(pub f64);
impl_from_primitive!(Equity, f64);
impl_finite_positive!(Equity);

/// Identifier of a traded instrument (e.g. `"EURUSD"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(Arc<str>);

impl InstrumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for InstrumentId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ================================================================================================
// Actions & Agents
// ================================================================================================

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    EnumString,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    IntoStaticStr,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    /// Neutral fallback. Its Q-value is never learned.
    #[default]
    Hold,
}

/// The two trading personalities owned by the decision core.
#[derive(
    Copy,
    Clone,
    Debug,
    EnumString,
    Display,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    PartialOrd,
    Ord,
    IntoStaticStr,
    EnumIter,
    EnumCount,
)]
#[strum(serialize_all = "lowercase")]
pub enum AgentId {
    /// Patient, trend-following profile.
    Patient,
    /// Aggressive, volatility-seeking profile.
    Aggressive,
}

impl AgentId {
    pub fn index(self) -> usize {
        match self {
            Self::Patient => 0,
            Self::Aggressive => 1,
        }
    }
}

// ================================================================================================
// Trade Outcomes
// ================================================================================================

/// Kinematic features captured when a position was opened. Used to calibrate
/// the win-probability predictor once the trade closes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EntryFeatures {
    pub chi_z: f64,
    pub accel_z: f64,
}

/// A closed trade, as reported by the execution collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub regime: Regime,
    pub net_pnl: f64,
    pub reward: f64,
    pub action: TradeAction,
    pub agent_id: AgentId,
    /// `true` if the trade followed the live policy's action (with or without
    /// capital at risk), `false` if it was the challenger's trade.
    pub was_live: bool,
    pub features: Option<EntryFeatures>,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_id_serializes_as_plain_string() {
        let id = InstrumentId::from("EURUSD");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"EURUSD\"");

        let back: InstrumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_str(), "EURUSD");
    }
}
