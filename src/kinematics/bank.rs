use std::collections::HashMap;

use crate::{
    config::DetectorConfig,
    domain::{InstrumentId, Price, Volatility},
    kinematics::{detector::RegimeDetector, state::KinematicState},
};

/// Instrument-keyed collection of detectors. Detectors are created lazily on
/// the first observation for an instrument and share one configuration.
#[derive(Debug, Clone, Default)]
pub struct DetectorBank {
    cfg: DetectorConfig,
    detectors: HashMap<InstrumentId, RegimeDetector>,
}

impl DetectorBank {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            cfg,
            detectors: HashMap::new(),
        }
    }

    /// Routes one observation to the instrument's detector.
    ///
    /// Returns the updated state, or `None` if the observation was rejected.
    /// A rejected first observation does not register the instrument.
    pub fn update(
        &mut self,
        instrument: &InstrumentId,
        price: Price,
        volatility: Volatility,
    ) -> Option<KinematicState> {
        if let Some(detector) = self.detectors.get_mut(instrument) {
            return detector.update(price, volatility).then(|| detector.state());
        }

        let mut detector = RegimeDetector::new(self.cfg.clone());
        if !detector.update(price, volatility) {
            return None;
        }
        let state = detector.state();
        tracing::debug!(instrument = %instrument, "Registered detector");
        self.detectors.insert(instrument.clone(), detector);
        Some(state)
    }

    /// Current state, or the neutral calibrating state for unknown instruments.
    pub fn state(&self, instrument: &InstrumentId) -> KinematicState {
        self.detectors
            .get(instrument)
            .map(RegimeDetector::state)
            .unwrap_or_default()
    }

    pub fn is_ready(&self, instrument: &InstrumentId) -> bool {
        self.detectors
            .get(instrument)
            .is_some_and(RegimeDetector::is_ready)
    }

    pub fn get(&self, instrument: &InstrumentId) -> Option<&RegimeDetector> {
        self.detectors.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentId> {
        self.detectors.keys()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn remove(&mut self, instrument: &InstrumentId) -> Option<RegimeDetector> {
        self.detectors.remove(instrument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::state::Regime;

    #[test]
    fn detectors_are_created_lazily_per_instrument() {
        let mut bank = DetectorBank::new(DetectorConfig::default());
        let eur = InstrumentId::from("EURUSD");
        let gbp = InstrumentId::from("GBPUSD");

        assert!(bank.is_empty());
        assert_eq!(bank.state(&eur).regime, Regime::Calibrating);

        assert!(bank.update(&eur, Price(1.1), Volatility(0.001)).is_some());
        assert!(bank.update(&gbp, Price(1.3), Volatility(0.001)).is_some());
        assert!(bank.update(&eur, Price(1.2), Volatility(0.001)).is_some());

        assert_eq!(bank.len(), 2);
        assert_eq!(bank.get(&eur).map(RegimeDetector::observations), Some(2));
        assert_eq!(bank.get(&gbp).map(RegimeDetector::observations), Some(1));
    }

    #[test]
    fn rejected_first_tick_does_not_register() {
        let mut bank = DetectorBank::new(DetectorConfig::default());
        let id = InstrumentId::from("XAUUSD");

        assert!(bank.update(&id, Price(f64::NAN), Volatility(1.0)).is_none());
        assert!(bank.is_empty());
        assert!(!bank.is_ready(&id));
    }
}
