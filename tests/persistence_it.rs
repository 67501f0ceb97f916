use std::fs;

use chrono::TimeDelta;
use quantum_core::{persistence::codec, prelude::*};

mod common;

use common::{cleanup, outcome, setup_persistent_config, t0};

fn trained_core(cfg: CoreConfig) -> DecisionCore {
    let mut core = DecisionCore::new(cfg).unwrap();
    for i in 0..25 {
        let pnl = if i % 3 == 0 { -1.0 } else { 2.0 };
        let agent = if i % 2 == 0 {
            AgentId::Patient
        } else {
            AgentId::Aggressive
        };
        let regime = [Regime::Trend, Regime::MeanRev, Regime::Critical][i % 3];
        core.on_trade_outcome(t0(), outcome(agent, regime, pnl, i % 4 != 0));
    }
    core.on_equity(t0(), Equity(25_000.0));
    core
}

#[test]
fn engine_state_survives_save_and_restart() {
    let (cfg, dir) = setup_persistent_config("restart");
    let core = trained_core(cfg.clone());
    let snapshot = core.snapshot(t0());

    let manager = PersistenceManager::new(cfg.clone());
    manager.save(&snapshot).unwrap();

    let restored = manager.load(t0());
    assert_eq!(restored.source, RestoreSource::Main);
    assert_eq!(restored.snapshot, snapshot);

    let restarted = DecisionCore::restore(cfg, restored.snapshot, t0()).unwrap();
    assert_eq!(restarted.snapshot(t0()), snapshot);

    // Session counters start over; cumulative statistics carry across
    let (before, after) = (core.statistics(), restarted.statistics());
    for (b, a) in before.agents.iter().zip(after.agents.iter()) {
        assert_eq!(a.live.trades, b.live.trades);
        assert_eq!(a.live.regimes, b.live.regimes);
        assert_eq!(a.challenger.regimes, b.challenger.regimes);
        assert_eq!(a.rolling_win_rate, b.rolling_win_rate);
        assert_eq!(a.challenger.session_trades, 0);
    }

    cleanup(dir);
}

#[test]
fn untrained_core_survives_save_and_load() {
    let (cfg, dir) = setup_persistent_config("untrained");
    let saved_at = t0() + TimeDelta::nanoseconds(123_456_789);
    let snapshot = DecisionCore::new(cfg.clone()).unwrap().snapshot(saved_at);

    let manager = PersistenceManager::new(cfg.clone());
    manager.save(&snapshot).unwrap();

    let restored = manager.load(t0());
    assert_eq!(restored.source, RestoreSource::Main);
    assert_eq!(restored.version, Some(codec::CURRENT_VERSION));
    assert_eq!(restored.snapshot, snapshot);
    assert_eq!(restored.snapshot, PersistedSnapshot::fresh(&cfg, saved_at));

    cleanup(dir);
}

#[test]
fn prior_format_is_migrated_conservatively() {
    let (cfg, dir) = setup_persistent_config("migrate");
    let snapshot = trained_core(cfg.clone()).snapshot(t0());

    let manager = PersistenceManager::new(cfg.clone());
    fs::create_dir_all(&dir).unwrap();
    let bytes = codec::encode_version(&snapshot, codec::V1).unwrap();
    fs::write(manager.main_path(), bytes).unwrap();

    let restored = manager.load(t0());
    assert_eq!(restored.source, RestoreSource::Main);
    assert_eq!(restored.version, Some(codec::V1));

    let migrated = &restored.snapshot;
    assert_eq!(migrated.breaker.status, BreakerStatus::Halted);
    assert_eq!(migrated.breaker.peak_equity, 25_000.0);
    for id in [AgentId::Patient, AgentId::Aggressive] {
        let before = snapshot.agent(id);
        let after = migrated.agent(id);
        for (old, new) in before.challenger.iter().zip(after.challenger.iter()) {
            assert_eq!(new.q_buy, old.q_buy);
            assert_eq!(new.trades, old.trades);
            assert_eq!(new.learning_rate, cfg.agent(id).initial_learning_rate);
        }
        assert!(after.risk_window.is_empty());
        assert_eq!(after.swap_count, before.swap_count);
    }

    // A migrated core resumes halted, with a fresh cooldown
    let core = DecisionCore::restore(cfg.clone(), restored.snapshot, t0()).unwrap();
    assert!(!core.can_trade_live());
    assert!(!core.can_trade_challenger(t0()));
    let cooled = t0() + TimeDelta::minutes(cfg.breaker.cooldown_minutes);
    assert!(core.can_trade_challenger(cooled));

    // The next save upgrades the file
    manager.save(&core.snapshot(t0())).unwrap();
    assert_eq!(manager.load(t0()).version, Some(codec::CURRENT_VERSION));

    cleanup(dir);
}

#[test]
fn corrupt_main_falls_back_to_backup_then_fresh() {
    let (cfg, dir) = setup_persistent_config("fallback");
    let manager = PersistenceManager::new(cfg.clone());

    let first = trained_core(cfg.clone()).snapshot(t0());
    let second = DecisionCore::new(cfg.clone()).unwrap().snapshot(t0());
    manager.save(&first).unwrap();
    manager.save(&second).unwrap();

    // Damage the body of the main file
    let mut bytes = fs::read(manager.main_path()).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    fs::write(manager.main_path(), &bytes).unwrap();

    let restored = manager.load(t0());
    assert_eq!(restored.source, RestoreSource::Backup);
    assert_eq!(restored.snapshot, first);

    // Truncate the backup as well
    let backup = fs::read(manager.backup_path()).unwrap();
    fs::write(manager.backup_path(), &backup[..backup.len() / 3]).unwrap();

    let restored = manager.load(t0());
    assert_eq!(restored.source, RestoreSource::Fresh);
    assert_eq!(restored.snapshot, PersistedSnapshot::fresh(&cfg, t0()));

    cleanup(dir);
}
