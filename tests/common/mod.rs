#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use quantum_core::prelude::*;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 7, 0, 0).unwrap()
}

/// Small detector windows so that tests warm up quickly.
pub fn setup_config() -> CoreConfig {
    CoreConfig::default()
        .with_detector(
            DetectorConfig::default()
                .with_windows(3, 6, 12)
                .with_chi_window(6),
        )
        .with_edge(EdgeConfig::default().with_min_trades(20))
        .with_breaker(
            BreakerConfig::default()
                .with_max_consecutive_losses(5)
                .with_cooldown_minutes(30)
                .with_probation(4, 0.5, 1.2),
        )
}

/// Configuration persisting under a fresh, test-specific temp directory.
pub fn setup_persistent_config(name: &str) -> (CoreConfig, PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "quantum_core_it_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let cfg = setup_config()
        .with_persistence(PersistenceConfig::default().with_directory(&dir));
    (cfg, dir)
}

pub fn cleanup(dir: PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

pub fn warm_trend(core: &mut DecisionCore, instrument: &InstrumentId) {
    for i in 0..40 {
        core.on_tick(instrument, Price(100.0 + 0.5 * i as f64), Volatility(1.0));
    }
}

pub fn outcome(agent: AgentId, regime: Regime, pnl: f64, was_live: bool) -> TradeOutcome {
    TradeOutcome {
        regime,
        net_pnl: pnl,
        reward: pnl,
        action: TradeAction::Buy,
        agent_id: agent,
        was_live,
        features: Some(EntryFeatures::default()),
    }
}
