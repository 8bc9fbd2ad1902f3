//! The strategy evaluator.
//!
//! A single spinning worker: snapshot the shared record under the lock,
//! decide outside it, emit a trade datagram when a directional spread
//! clears the threshold, and write the post-trade metric bundle back
//! atomically. The lock contention window is bounded to the record copy,
//! never to I/O, and the freshness test runs against the snapshot so the
//! decision always sees a coherent pair of quotes.
//!
//! Gating order per iteration: run flag, kill switch, circuit, mode,
//! freshness, threshold, rate limit, armed trade route. Any failed gate
//! yields the scheduler and retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, warn};

use pocket_common::clock::{now_ns, NANOS_PER_SEC};
use pocket_common::types::{Side, Venue};
use pocket_common::wire::TradeMsg;

use crate::config::CoreConfig;
use crate::latency_log::{LatencyLog, LatencyRow};
use crate::shm::SharedState;
use crate::state::{CoreState, ExchangeQuote, TradeOutcome};
use crate::trade::{TradeRoute, TradeSender};

/// Direction of a firing spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadDirection {
    /// Buy the EXA ask, sell the EXB bid.
    ExaToExb,
    /// Buy the EXB ask, sell the EXA bid.
    ExbToExa,
}

/// A spread that cleared the threshold, resolved into two legs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbDecision {
    pub direction: SpreadDirection,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread: f64,
}

/// Compute both directional spreads and pick the winning branch, if any.
///
/// The first branch at or above `min_spread` wins; a tie favors
/// EXA→EXB. Returns the two spreads unconditionally so the caller can
/// publish them even when nothing fires.
pub fn decide(
    exa: &ExchangeQuote,
    exb: &ExchangeQuote,
    min_spread: f64,
) -> (f64, f64, Option<ArbDecision>) {
    let spread_exa_to_exb = exb.bid - exa.ask;
    let spread_exb_to_exa = exa.bid - exb.ask;

    let decision = if spread_exa_to_exb >= min_spread {
        Some(ArbDecision {
            direction: SpreadDirection::ExaToExb,
            buy_venue: Venue::Exa,
            sell_venue: Venue::Exb,
            buy_price: exa.ask,
            sell_price: exb.bid,
            spread: spread_exa_to_exb,
        })
    } else if spread_exb_to_exa >= min_spread {
        Some(ArbDecision {
            direction: SpreadDirection::ExbToExa,
            buy_venue: Venue::Exb,
            sell_venue: Venue::Exa,
            buy_price: exb.ask,
            sell_price: exa.bid,
            spread: spread_exb_to_exa,
        })
    } else {
        None
    };

    (spread_exa_to_exb, spread_exb_to_exa, decision)
}

/// Evaluator constants, fixed for the process lifetime. The tunable
/// parameters (threshold, size, mode, kill switch) live in the shared
/// record instead, where observers can change them.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    pub stale_threshold_ns: u64,
    pub max_trades_per_second: u32,
    pub pnl_limit: f64,
}

impl EvaluatorConfig {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            stale_threshold_ns: config.feeds.stale_threshold_ns(),
            max_trades_per_second: config.risk.max_trades_per_second,
            pnl_limit: config.risk.pnl_limit,
        }
    }
}

/// The spinning evaluation worker.
pub struct Evaluator {
    shared: Arc<SharedState>,
    route: Arc<TradeRoute>,
    sender: TradeSender,
    log: Option<LatencyLog>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(
        shared: Arc<SharedState>,
        route: Arc<TradeRoute>,
        sender: TradeSender,
        log: Option<LatencyLog>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            shared,
            route,
            sender,
            log,
            config,
        }
    }

    /// Spin until `running` clears. Yields the scheduler between
    /// iterations; the only blocking point is the trade send itself.
    pub fn run(&mut self, running: &AtomicBool) {
        let mut window_start_ns = now_ns();
        let mut trades_in_window: u32 = 0;

        while running.load(Ordering::Acquire) {
            let t_now = now_ns();
            if t_now.saturating_sub(window_start_ns) >= NANOS_PER_SEC {
                window_start_ns = t_now;
                trades_in_window = 0;
            }

            let snapshot = self.shared.with_lock(|state| *state);

            if !running.load(Ordering::Acquire)
                || snapshot.kill_switch != 0
                || snapshot.circuit_tripped != 0
                || snapshot.mode_is_off()
            {
                thread::yield_now();
                continue;
            }

            let fresh = snapshot.exa.is_fresh(t_now, self.config.stale_threshold_ns)
                && snapshot.exb.is_fresh(t_now, self.config.stale_threshold_ns);
            if !fresh {
                thread::yield_now();
                continue;
            }

            let (spread_exa_to_exb, spread_exb_to_exa, decision) =
                decide(&snapshot.exa, &snapshot.exb, snapshot.min_spread);

            let Some(decision) = decision else {
                self.shared
                    .with_lock(|state| state.record_spreads(spread_exa_to_exb, spread_exb_to_exa));
                thread::yield_now();
                continue;
            };

            if trades_in_window >= self.config.max_trades_per_second {
                // Sticky advisory: set once, cleared only by an observer.
                self.shared.with_lock(|state| state.rate_limited = 1);
                thread::yield_now();
                continue;
            }

            let Some(trade_ip) = self.route.get() else {
                thread::yield_now();
                continue;
            };

            let t_send = now_ns();
            let newest_tick_ns = snapshot.exa.last_update_ns.max(snapshot.exb.last_update_ns);
            let tick_to_trade_ns = t_send.saturating_sub(newest_tick_ns);

            let payload = TradeMsg {
                leg_a_exch: decision.buy_venue.label().to_string(),
                leg_a_side: Side::Buy,
                leg_a_price: decision.buy_price,
                leg_b_exch: decision.sell_venue.label().to_string(),
                leg_b_side: Side::Sell,
                leg_b_price: decision.sell_price,
                size: snapshot.trade_size,
                spread: decision.spread,
                t_send_ns: t_send,
            }
            .encode();

            if let Err(e) = self.sender.send(trade_ip, payload.as_bytes()) {
                error!("trade send to {trade_ip}:{} failed: {e}", self.sender.port());
                thread::yield_now();
                continue;
            }

            let pnl = (decision.sell_price - decision.buy_price) * snapshot.trade_size;
            let outcome = TradeOutcome {
                spread_exa_to_exb,
                spread_exb_to_exa,
                t_send_ns: t_send,
                tick_to_trade_ns,
                pnl,
            };
            let tripped = self.shared.with_lock(|state| {
                state.record_trade(&outcome, self.config.pnl_limit);
                state.circuit_tripped != 0
            });
            if tripped {
                warn!(
                    pnl_limit = self.config.pnl_limit,
                    "circuit breaker tripped, strategy forced off"
                );
            }

            trades_in_window += 1;

            if let Some(log) = self.log.as_mut() {
                let row = LatencyRow {
                    t_now_ns: now_ns(),
                    tick_to_trade_ns,
                    exa_avg_tick_interval_ns: snapshot.avg_tick_latency_exa_ns,
                    exb_avg_tick_interval_ns: snapshot.avg_tick_latency_exb_ns,
                };
                if let Err(e) = log.append(&row) {
                    warn!("latency log write failed: {e}");
                }
            }

            thread::yield_now();
        }
        debug!("strategy evaluator exiting");
    }
}

/// Snapshot accessor used by the shutdown summary.
pub fn snapshot(shared: &SharedState) -> CoreState {
    shared.with_lock(|state| *state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use pocket_common::types::StrategyMode;
    use pocket_common::wire::{parse_trade, TickMsg};

    use crate::config::StrategyParams;
    use crate::shm;

    fn quote(bid: f64, ask: f64, last_update_ns: u64) -> ExchangeQuote {
        ExchangeQuote {
            bid,
            ask,
            seq: 1,
            last_update_ns,
            connected: 1,
        }
    }

    #[test]
    fn decide_fires_exa_to_exb() {
        let exa = quote(100.00, 100.05, 0);
        let exb = quote(100.20, 100.25, 0);
        let (a2b, b2a, decision) = decide(&exa, &exb, 0.10);

        assert!((a2b - 0.15).abs() < 1e-12);
        assert!((b2a + 0.25).abs() < 1e-12);
        let decision = decision.unwrap();
        assert_eq!(decision.direction, SpreadDirection::ExaToExb);
        assert_eq!(decision.buy_venue, Venue::Exa);
        assert_eq!(decision.buy_price, 100.05);
        assert_eq!(decision.sell_price, 100.20);
    }

    #[test]
    fn decide_fires_exb_to_exa() {
        let exa = quote(100.30, 100.35, 0);
        let exb = quote(100.00, 100.05, 0);
        let (_, b2a, decision) = decide(&exa, &exb, 0.10);

        assert!((b2a - 0.25).abs() < 1e-12);
        let decision = decision.unwrap();
        assert_eq!(decision.direction, SpreadDirection::ExbToExa);
        assert_eq!(decision.buy_venue, Venue::Exb);
        assert_eq!(decision.buy_price, 100.05);
        assert_eq!(decision.sell_price, 100.30);
    }

    #[test]
    fn decide_spread_exactly_at_threshold_fires() {
        let exa = quote(100.00, 100.05, 0);
        let exb = quote(100.15, 100.20, 0);
        let (a2b, _, decision) = decide(&exa, &exb, 0.10);
        assert!((a2b - 0.10).abs() < 1e-12);
        assert!(decision.is_some());
    }

    #[test]
    fn decide_below_threshold_returns_spreads_only() {
        let exa = quote(100.00, 100.05, 0);
        let exb = quote(100.10, 100.14, 0);
        let (a2b, b2a, decision) = decide(&exa, &exb, 0.10);
        assert!((a2b - 0.05).abs() < 1e-12);
        assert!((b2a + 0.14).abs() < 1e-12);
        assert!(decision.is_none());
    }

    #[test]
    fn decide_tie_break_favors_exa_to_exb() {
        // Degenerate books where both directions clear the threshold.
        let exa = quote(101.0, 100.0, 0);
        let exb = quote(101.0, 100.0, 0);
        let (a2b, b2a, decision) = decide(&exa, &exb, 0.5);
        assert_eq!(a2b, 1.0);
        assert_eq!(b2a, 1.0);
        assert_eq!(decision.unwrap().direction, SpreadDirection::ExaToExb);
    }

    // --- evaluator loop tests against a real region and loopback sink ---

    static NAME_SEQ: AtomicU32 = AtomicU32::new(0);

    fn unique_shm_name() -> String {
        format!(
            "/pockettrader_strat_test_{}_{}",
            std::process::id(),
            NAME_SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    struct Cleanup(String);
    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = shm::unlink(&self.0);
        }
    }

    struct Fixture {
        shared: Arc<SharedState>,
        running: Arc<AtomicBool>,
        sink: UdpSocket,
        worker: Option<thread::JoinHandle<()>>,
        _cleanup: Cleanup,
    }

    impl Fixture {
        fn start(config: EvaluatorConfig) -> Self {
            let name = unique_shm_name();
            let cleanup = Cleanup(name.clone());
            let shared =
                Arc::new(SharedState::open_or_create(&name, &StrategyParams::default()).unwrap());

            let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
            sink.set_read_timeout(Some(Duration::from_millis(400)))
                .unwrap();
            let trade_port = sink.local_addr().unwrap().port();

            let route = Arc::new(TradeRoute::pre_armed("127.0.0.1".parse().unwrap()));
            let sender = TradeSender::new(trade_port).unwrap();

            let running = Arc::new(AtomicBool::new(true));
            let mut evaluator =
                Evaluator::new(shared.clone(), route, sender, None, config);
            let flag = running.clone();
            let worker = thread::spawn(move || evaluator.run(&flag));

            Self {
                shared,
                running,
                sink,
                worker: Some(worker),
                _cleanup: cleanup,
            }
        }

        fn publish(&self, venue: Venue, bid: f64, ask: f64) {
            let tick = TickMsg {
                exch: venue.label().to_string(),
                symbol: "BTCUSD".to_string(),
                bid,
                ask,
                seq: 1,
                ts_ns: 0,
            };
            let t_recv = now_ns();
            self.shared
                .with_lock(|state| state.apply_tick(venue, &tick, t_recv));
        }

        fn recv(&self) -> Option<String> {
            let mut buf = [0u8; 512];
            match self.sink.recv_from(&mut buf) {
                Ok((n, _)) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
                Err(_) => None,
            }
        }

        fn drain(&self, window: Duration) -> Vec<String> {
            let deadline = std::time::Instant::now() + window;
            let mut out = Vec::new();
            let mut buf = [0u8; 512];
            self.sink
                .set_read_timeout(Some(Duration::from_millis(20)))
                .unwrap();
            while std::time::Instant::now() < deadline {
                if let Ok((n, _)) = self.sink.recv_from(&mut buf) {
                    out.push(String::from_utf8_lossy(&buf[..n]).into_owned());
                }
            }
            out
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Release);
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    #[test]
    fn crossing_quotes_emit_trade_with_expected_legs() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        fixture.publish(Venue::Exa, 100.00, 100.05);
        fixture.publish(Venue::Exb, 100.20, 100.25);

        let payload = fixture.recv().expect("trade datagram within deadline");
        assert!(
            payload.starts_with("TRADE ARB1 EXA BUY 100.050000 EXB SELL 100.200000 0.010000 0.150000 "),
            "unexpected payload: {payload}"
        );
        let trade = parse_trade(&payload).unwrap();
        assert!(trade.t_send_ns > 0);

        // The worker records state after sending the datagram, so poll
        // briefly rather than racing it right after the recv above.
        let mut state = snapshot(&fixture.shared);
        for _ in 0..100 {
            if state.trades_count >= 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            state = snapshot(&fixture.shared);
        }
        assert!(state.trades_count >= 1);
        assert_eq!(state.trades_count, state.winning_trades + state.losing_trades);
        assert!((state.last_trade_pnl - 0.0015).abs() < 1e-9);
        assert!((state.last_spread_exa_to_exb - 0.15).abs() < 1e-9);
        assert!(state.last_trade_ts_ns > 0);
    }

    #[test]
    fn below_threshold_records_spreads_without_trading() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        fixture.publish(Venue::Exa, 100.00, 100.05);
        fixture.publish(Venue::Exb, 100.10, 100.14);

        assert!(fixture.recv().is_none(), "no trade expected below threshold");

        let state = snapshot(&fixture.shared);
        assert_eq!(state.trades_count, 0);
        assert!((state.last_spread_exa_to_exb - 0.05).abs() < 1e-9);
        assert!((state.last_spread_exb_to_exa + 0.14).abs() < 1e-9);
    }

    #[test]
    fn kill_switch_blocks_emission() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        fixture.shared.with_lock(|state| state.kill_switch = 1);
        fixture.publish(Venue::Exa, 100.00, 100.05);
        fixture.publish(Venue::Exb, 100.20, 100.25);

        fixture
            .sink
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        assert!(fixture.recv().is_none(), "kill switch must block trades");
        assert_eq!(snapshot(&fixture.shared).trades_count, 0);
    }

    #[test]
    fn mode_off_blocks_emission() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        fixture
            .shared
            .with_lock(|state| state.strategy_mode = StrategyMode::Off.as_raw());
        fixture.publish(Venue::Exa, 100.00, 100.05);
        fixture.publish(Venue::Exb, 100.20, 100.25);

        fixture
            .sink
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        assert!(fixture.recv().is_none());
        assert_eq!(snapshot(&fixture.shared).trades_count, 0);
    }

    #[test]
    fn stale_venue_blocks_until_refreshed() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        // EXA last updated 600 ms ago, EXB fresh: both must be fresh.
        let stale_ts = now_ns() - 600_000_000;
        fixture.shared.with_lock(|state| {
            state.exa = quote(100.00, 100.05, stale_ts);
        });
        fixture.publish(Venue::Exb, 100.20, 100.25);

        fixture
            .sink
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        assert!(fixture.recv().is_none(), "stale EXA must block trades");
        assert_eq!(snapshot(&fixture.shared).trades_count, 0);

        // A fresh EXA tick that still crosses re-enables emission.
        fixture.publish(Venue::Exa, 100.00, 100.05);
        fixture
            .sink
            .set_read_timeout(Some(Duration::from_millis(400)))
            .unwrap();
        assert!(fixture.recv().is_some(), "fresh quotes must trade");
    }

    #[test]
    fn rate_limit_caps_window_and_sets_sticky_flag() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        fixture.shared.with_lock(|state| state.min_spread = 0.0);
        fixture.publish(Venue::Exa, 100.0, 100.0);
        fixture.publish(Venue::Exb, 101.0, 101.0);

        // Well inside the first one-second window: the cap is 20.
        let received = fixture.drain(Duration::from_millis(300));
        assert!(!received.is_empty());
        assert!(
            received.len() <= 20,
            "rate limit exceeded: {} trades",
            received.len()
        );

        let state = snapshot(&fixture.shared);
        assert_eq!(state.rate_limited, 1);
        assert_eq!(state.trades_count, 20);
    }

    #[test]
    fn circuit_breaker_trips_and_silences_strategy() {
        let fixture = Fixture::start(EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        });

        // A deliberately losing book: buying EXA at 101 and selling EXB at
        // 100 with size 200 loses 200 per trade, blowing the -100 limit on
        // the first fill.
        fixture.shared.with_lock(|state| {
            state.min_spread = -10.0;
            state.trade_size = 200.0;
        });
        fixture.publish(Venue::Exa, 100.5, 101.0);
        fixture.publish(Venue::Exb, 100.0, 102.0);

        assert!(fixture.recv().is_some(), "first losing trade still emits");

        let mut state = snapshot(&fixture.shared);
        for _ in 0..100 {
            if state.circuit_tripped == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
            state = snapshot(&fixture.shared);
        }
        assert_eq!(state.circuit_tripped, 1);
        assert_eq!(state.strategy_mode, StrategyMode::Off.as_raw());
        assert_eq!(state.trades_count, 1);
        assert!(state.cumulative_pnl < -100.0);

        // Tripped circuit silences further emission even on fresh quotes.
        fixture.publish(Venue::Exa, 100.5, 101.0);
        fixture.publish(Venue::Exb, 100.0, 102.0);
        fixture
            .sink
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        assert!(fixture.recv().is_none(), "circuit must block trades");
        assert_eq!(snapshot(&fixture.shared).trades_count, 1);
    }

    #[test]
    fn unarmed_route_blocks_emission() {
        let name = unique_shm_name();
        let _cleanup = Cleanup(name.clone());
        let shared =
            Arc::new(SharedState::open_or_create(&name, &StrategyParams::default()).unwrap());

        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_millis(150))).unwrap();
        let trade_port = sink.local_addr().unwrap().port();

        let route = Arc::new(TradeRoute::new());
        let sender = TradeSender::new(trade_port).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let config = EvaluatorConfig {
            stale_threshold_ns: 500_000_000,
            max_trades_per_second: 20,
            pnl_limit: -100.0,
        };
        let mut evaluator = Evaluator::new(shared.clone(), route, sender, None, config);
        let flag = running.clone();
        let worker = thread::spawn(move || evaluator.run(&flag));

        let t_recv = now_ns();
        shared.with_lock(|state| {
            state.exa = quote(100.00, 100.05, t_recv);
            state.exb = quote(100.20, 100.25, t_recv);
        });

        let mut buf = [0u8; 512];
        assert!(sink.recv_from(&mut buf).is_err(), "no route, no trade");
        assert_eq!(shared.with_lock(|state| state.trades_count), 0);

        running.store(false, Ordering::Release);
        worker.join().unwrap();
    }
}
