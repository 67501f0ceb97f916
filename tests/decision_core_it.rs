use chrono::TimeDelta;
use quantum_core::prelude::*;

mod common;

use common::{outcome, setup_config, t0, warm_trend};

#[test]
fn trend_session_earns_live_authorization() {
    let mut core = DecisionCore::new(setup_config()).unwrap();
    let instrument = InstrumentId::from("BTCUSDT");
    warm_trend(&mut core, &instrument);

    let first = core.evaluate(&instrument, t0());
    assert_eq!(first.regime, Regime::Trend);
    assert_eq!(first.authorization, Authorization::ShadowOnly);

    // Paper trades that follow the live policy build its track record
    for i in 0..30 {
        let pnl = if i % 4 == 0 { -1.0 } else { 1.5 };
        assert!(core.on_trade_outcome(t0(), outcome(first.agent, first.regime, pnl, true)));
    }

    let second = core.evaluate(&instrument, t0());
    assert!(second.has_edge);
    assert_eq!(second.authorization, Authorization::Live);
    assert_eq!(second.action, TradeAction::Buy);
    assert!(core.can_trade_live());
}

#[test]
fn challenger_is_promoted_through_the_engine() {
    let mut core = DecisionCore::new(setup_config()).unwrap();

    // Live: 12 trades, profit factor 1.0
    for i in 0..12 {
        let pnl = if i % 2 == 0 { 1.0 } else { -1.0 };
        core.on_trade_outcome(t0(), outcome(AgentId::Aggressive, Regime::MeanRev, pnl, true));
    }
    assert_eq!(core.status(), BreakerStatus::Live);

    // Challenger: 10 trades, profit factor 8.0
    for i in 0..10 {
        let pnl = if i < 8 { 2.0 } else { -1.0 };
        core.on_trade_outcome(t0(), outcome(AgentId::Aggressive, Regime::MeanRev, pnl, false));
    }

    let agent = core.agent(AgentId::Aggressive);
    assert_eq!(agent.swap_count(), 1);
    assert_eq!(agent.last_swap(), Some(t0()));
    assert_eq!(agent.live().total_trades(), 10);
    assert_eq!(agent.challenger().total_trades(), 0);

    let stats = core.statistics();
    assert_eq!(stats.agent(AgentId::Aggressive).unwrap().swap_count, 1);
    assert_eq!(stats.agent(AgentId::Patient).unwrap().swap_count, 0);
}

#[test]
fn drawdown_halts_and_only_reinstatement_resumes_live_trading() {
    let mut core = DecisionCore::new(setup_config()).unwrap();
    let instrument = InstrumentId::from("EURUSD");
    warm_trend(&mut core, &instrument);

    core.on_equity(t0(), Equity(10_000.0));
    let next_day = t0() + TimeDelta::days(1);
    assert_eq!(core.on_equity(next_day, Equity(8_000.0)), BreakerStatus::Halted);
    let reason = &core.breaker().halt_record().unwrap().reason;
    assert!(reason.contains("drawdown"), "reason: {reason}");

    // Cooldown, then probation on challenger trades
    let after = next_day + TimeDelta::minutes(30);
    assert_eq!(core.poll(after), BreakerStatus::Retraining);
    for pnl in [1.0, 1.0, -0.5, 1.0] {
        core.on_trade_outcome(after, outcome(AgentId::Patient, Regime::Trend, pnl, false));
    }
    assert_eq!(core.status(), BreakerStatus::Pending);

    // Trade outcomes and equity alone never resume live trading
    for _ in 0..10 {
        core.on_trade_outcome(after, outcome(AgentId::Patient, Regime::Trend, 5.0, false));
        core.on_equity(after, Equity(12_000.0));
    }
    assert_eq!(core.status(), BreakerStatus::Pending);
    assert_eq!(
        core.evaluate(&instrument, after).authorization,
        Authorization::ShadowOnly
    );

    assert!(core.reinstate(after));
    assert!(core.can_trade_live());
    assert_eq!(core.breaker().peak_equity(), 12_000.0);
    assert_eq!(core.breaker().drawdown(), 0.0);
}

#[test]
fn instruments_are_tracked_independently() {
    let mut core = DecisionCore::new(setup_config()).unwrap();
    let trending = InstrumentId::from("ES");
    let fresh = InstrumentId::from("NQ");

    warm_trend(&mut core, &trending);
    core.on_tick(&fresh, Price(100.0), Volatility(1.0));
    assert!(core.on_tick(&fresh, Price(f64::NAN), Volatility(1.0)).is_none());

    assert_eq!(core.state(&trending).regime, Regime::Trend);
    assert!(core.state(&fresh).is_calibrating());
    assert_eq!(
        core.evaluate(&fresh, t0()).authorization,
        Authorization::Blocked
    );
    assert_eq!(core.statistics().instruments, 2);
}
