//! Process lifecycle: worker threads, signal handling, shutdown.
//!
//! Three workers (two feed receivers, one strategy evaluator) plus the
//! main thread, which sleeps in one-second ticks until the run flag
//! clears. SIGINT and SIGTERM clear the flag from an async-signal-safe
//! handler; every worker loop observes it at the top of its iteration.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use pocket_common::types::Venue;

use crate::config::CoreConfig;
use crate::feed::{bind_feed_socket, FeedReceiver};
use crate::latency_log::{LatencyLog, LATENCY_LOG_FILE};
use crate::shm::{SharedState, SHM_NAME};
use crate::strategy::{snapshot, Evaluator, EvaluatorConfig};
use crate::trade::{TradeRoute, TradeSender};

static RUNNING: AtomicBool = AtomicBool::new(true);

/// Process-wide run flag. True until SIGINT/SIGTERM.
pub fn running() -> &'static AtomicBool {
    &RUNNING
}

extern "C" fn handle_signal(_sig: libc::c_int) {
    // Only an atomic store: anything else is off-limits in a handler.
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as usize;
        libc::sigemptyset(&mut action.sa_mask);
        for sig in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error())
                    .with_context(|| format!("install handler for signal {sig}"));
            }
        }
    }
    Ok(())
}

/// Bring the core up, run until a shutdown signal, tear it down.
///
/// Any failure before the workers start (shared region, sockets) is
/// returned and maps to a nonzero exit.
pub fn run(config: CoreConfig) -> Result<()> {
    install_signal_handlers()?;

    let shared = Arc::new(
        SharedState::open_or_create(SHM_NAME, &config.strategy)
            .context("open shared state region")?,
    );
    if shared.created() {
        info!(region = SHM_NAME, "created shared state region");
    } else {
        info!(region = SHM_NAME, "attached to existing shared state region");
    }

    let route = Arc::new(match config.trade_host {
        Some(ip) => {
            info!(%ip, "trade destination fixed from configuration");
            TradeRoute::pre_armed(ip)
        }
        None => TradeRoute::new(),
    });

    // A missing latency log degrades observability, not the dataplane.
    let latency_log = match LatencyLog::create(Path::new(LATENCY_LOG_FILE)) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!("latency log disabled: {e:#}");
            None
        }
    };

    let sender = TradeSender::new(config.trade_port).context("create trade socket")?;
    let exa_socket = bind_feed_socket(config.exa_port)
        .with_context(|| format!("EXA feed on port {}", config.exa_port))?;
    let exb_socket = bind_feed_socket(config.exb_port)
        .with_context(|| format!("EXB feed on port {}", config.exb_port))?;

    info!(
        exa_port = config.exa_port,
        exb_port = config.exb_port,
        trade_port = config.trade_port,
        "pockettrader core listening"
    );

    let exa = FeedReceiver::new(Venue::Exa, exa_socket, shared.clone(), route.clone());
    let exb = FeedReceiver::new(Venue::Exb, exb_socket, shared.clone(), route.clone());
    let mut evaluator = Evaluator::new(
        shared.clone(),
        route,
        sender,
        latency_log,
        EvaluatorConfig::from_config(&config),
    );

    let exa_thread = thread::Builder::new()
        .name("feed-exa".into())
        .spawn(move || exa.run(running()))
        .context("spawn EXA receiver")?;
    let exb_thread = thread::Builder::new()
        .name("feed-exb".into())
        .spawn(move || exb.run(running()))
        .context("spawn EXB receiver")?;
    let strategy_thread = thread::Builder::new()
        .name("strategy".into())
        .spawn(move || evaluator.run(running()))
        .context("spawn strategy evaluator")?;

    while RUNNING.load(Ordering::Acquire) {
        thread::sleep(Duration::from_secs(1));
    }
    info!("shutdown requested, joining workers");

    for (name, handle) in [
        ("feed-exa", exa_thread),
        ("feed-exb", exb_thread),
        ("strategy", strategy_thread),
    ] {
        if handle.join().is_err() {
            error!(thread = name, "worker panicked");
        }
    }

    let state = snapshot(&shared);
    info!(
        trades = state.trades_count,
        winning = state.winning_trades,
        losing = state.losing_trades,
        cumulative_pnl = state.cumulative_pnl,
        max_drawdown = state.max_drawdown,
        exa_avg_tick_interval_ns = state.avg_tick_latency_exa_ns,
        exb_avg_tick_interval_ns = state.avg_tick_latency_exb_ns,
        "session summary"
    );
    if state.circuit_tripped != 0 {
        warn!("circuit breaker was tripped during the session");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_clears_run_flag() {
        install_signal_handlers().unwrap();
        assert!(running().load(Ordering::Acquire));

        unsafe {
            libc::raise(libc::SIGTERM);
        }
        assert!(!running().load(Ordering::Acquire));

        // Restore for any other test touching the flag.
        RUNNING.store(true, Ordering::SeqCst);
    }
}
