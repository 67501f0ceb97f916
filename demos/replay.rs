use std::{env, fs, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use chrono::{TimeDelta, TimeZone, Utc};
use quantum_core::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use time::macros::format_description;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Replays a synthetic random-walk session through the decision core, then
/// saves and reloads the learned state.
///
/// Usage: `cargo run --example replay [config.json]`
fn main() -> Result<()> {
    let _guard = init_tracing()?;

    let cfg = config()?;
    let manager = PersistenceManager::new(cfg.clone());
    let start = Utc
        .with_ymd_and_hms(2025, 1, 6, 8, 0, 0)
        .single()
        .context("Invalid start timestamp")?;

    let restored = manager.load(start);
    println!("Restored state from {} (version {:?})", restored.source, restored.version);
    let mut core = DecisionCore::restore(cfg, restored.snapshot, start)?;

    let run_start = Instant::now();
    let summary = replay(&mut core, start, 20_000, 7);
    let run_time = run_start.elapsed();

    let end = start + TimeDelta::seconds(summary.ticks as i64);
    manager.save(&core.snapshot(end))?;
    let reloaded = manager
        .read_file(&manager.main_path())
        .context("Failed to re-read saved snapshot")?;

    println!("\n--- Replay Summary ---");
    println!("1. Ticks:                   {}", summary.ticks);
    println!("2. Live / shadow trades:    {} / {}", summary.live, summary.shadow);
    println!("3. Blocked evaluations:     {}", summary.blocked);
    println!("4. Breaker status:          {}", core.status());
    println!("5. Snapshot version:        {}", reloaded.version);
    println!("6. Run time:                {run_time:?}");
    println!("\n{}", core.statistics().to_json()?);

    drop(_guard);
    Ok(())
}

// ================================================================================================
// Replay
// ================================================================================================

#[derive(Debug, Default)]
struct Summary {
    ticks: usize,
    live: usize,
    shadow: usize,
    blocked: usize,
}

/// Drives one instrument through a drifting random walk. Every tenth tick the
/// core is evaluated and the proposed trade is closed against the next ten
/// ticks of price movement.
fn replay(
    core: &mut DecisionCore,
    start: chrono::DateTime<Utc>,
    ticks: usize,
    seed: u64,
) -> Summary {
    let mut rng = StdRng::seed_from_u64(seed);
    let instrument = InstrumentId::from("EURUSD");
    let mut summary = Summary::default();

    let mut price = 1.1000_f64;
    let mut drift = 0.0_f64;
    let mut equity = 10_000.0_f64;
    let mut open: Option<(Decision, TradeAction, bool, f64)> = None;

    for tick in 0..ticks {
        let now = start + TimeDelta::seconds(tick as i64);

        // Regime-switching drift
        if rng.random_bool(0.002) {
            drift = rng.random_range(-0.00004..0.00004);
        }
        price = (price + drift + rng.random_range(-0.0001..0.0001)).max(0.5);
        core.on_tick(&instrument, Price(price), Volatility(0.0002));
        summary.ticks += 1;

        if tick % 10 != 0 {
            continue;
        }

        if let Some((decision, action, was_live, entry)) = open.take() {
            let direction = match action {
                TradeAction::Buy => 1.0,
                TradeAction::Sell => -1.0,
                TradeAction::Hold => 0.0,
            };
            let net_pnl = direction * (price - entry) * 100_000.0 - 0.5;
            let agent = core.agent(decision.agent);
            let outcome = TradeOutcome {
                regime: decision.regime,
                net_pnl,
                reward: agent.reward_shaper().reward(net_pnl),
                action,
                agent_id: decision.agent,
                was_live,
                features: Some(decision.features),
            };
            if decision.is_live() {
                equity += net_pnl * agent.capital_allocation();
            }
            core.on_trade_outcome(now, outcome);
            core.on_equity(now, Equity(equity));
        }
        core.poll(now);

        let decision = core.evaluate(&instrument, now);
        match decision.authorization {
            Authorization::Blocked => summary.blocked += 1,
            Authorization::Live | Authorization::ShadowOnly => {
                // Alternate between the live and the exploring challenger policy
                let follow_live = rng.random_bool(0.5) && decision.action != TradeAction::Hold;
                let action = if follow_live {
                    decision.action
                } else {
                    core.agent(decision.agent)
                        .explore_action(decision.regime, &mut rng)
                };
                if action == TradeAction::Hold {
                    continue;
                }
                if follow_live && decision.is_live() {
                    summary.live += 1;
                } else {
                    summary.shadow += 1;
                }
                open = Some((decision, action, follow_live, price));
            }
        }

        if core.status() == BreakerStatus::Pending {
            info!("Probation passed; reinstating for the replay");
            core.reinstate(now);
        }
    }
    summary
}

// ================================================================================================
// Configuration
// ================================================================================================

fn config() -> Result<CoreConfig> {
    let cfg = match env::args().nth(1) {
        Some(path) => CoreConfig::from_path(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => CoreConfig::default(),
    };
    let persistence = cfg
        .persistence
        .clone()
        .with_directory(env::temp_dir().join("quantum-core-replay"));
    Ok(cfg.with_persistence(persistence))
}

// ================================================================================================
// Tracing Configuration
// ================================================================================================

fn init_tracing() -> Result<Option<WorkerGuard>> {
    let app_name = "quantum-core";

    // Detect if running in container
    let in_container =
        env::var("CONTAINER").is_ok() || std::path::Path::new("/.dockerenv").exists();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if in_container {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(true)
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .init();

        info!("Logging to stdout (container mode)");
        return Ok(None);
    }

    let log_dir = dirs::state_dir()
        .or_else(dirs::home_dir)
        .map(|p| p.join(app_name).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    fs::create_dir_all(&log_dir)?;

    let timestamp = time::OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("Failed to format timestamp")?;
    let file_name = format!("{app_name}-{timestamp}.log");
    let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(log_file = %log_dir.join(&file_name).display(), "Logging to file (local mode)");
    Ok(Some(guard))
}
