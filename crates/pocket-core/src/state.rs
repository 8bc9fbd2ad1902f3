//! The shared market-state record.
//!
//! `CoreState` is the single record every collaborator rendezvous on: the
//! two feed receivers publish quotes into it, the strategy evaluator
//! snapshots it and writes the post-trade metric bundle back, and external
//! observers map it read-mostly through the shared-memory region.
//!
//! The struct is `#[repr(C)]` plain-old-data on purpose: its layout is the
//! cross-process contract, so nothing here may own heap memory or carry a
//! niche. All mutation helpers assume the caller holds the region mutex.

use pocket_common::clock::ema_ns;
use pocket_common::types::{StrategyMode, Venue};
use pocket_common::wire::TickMsg;

/// One venue's latest best bid/offer.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ExchangeQuote {
    pub bid: f64,
    pub ask: f64,
    /// Sender-assigned sequence number, monotonically increasing.
    pub seq: u64,
    /// Monotonic receive timestamp. Never rewound.
    pub last_update_ns: u64,
    /// Set on the first successful parse, never cleared by the core;
    /// staleness is derived from `last_update_ns`.
    pub connected: i32,
}

impl ExchangeQuote {
    /// Freshness gate: connected and updated strictly less than
    /// `stale_threshold_ns` ago. An age exactly at the threshold is stale.
    #[inline]
    pub fn is_fresh(&self, t_now_ns: u64, stale_threshold_ns: u64) -> bool {
        self.connected != 0 && t_now_ns.saturating_sub(self.last_update_ns) < stale_threshold_ns
    }
}

/// The full shared record. Field order mirrors the published region layout
/// so foreign observers can map it structurally.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CoreState {
    // Latest quotes.
    pub exa: ExchangeQuote,
    pub exb: ExchangeQuote,

    // Strategy parameters, tunable by external observers.
    pub min_spread: f64,
    pub strategy_mode: i32,
    pub kill_switch: i32,
    pub trade_size: f64,

    // Trade metrics.
    pub last_spread_exa_to_exb: f64,
    pub last_spread_exb_to_exa: f64,
    pub last_trade_ts_ns: u64,
    pub cumulative_pnl: f64,
    pub trades_count: u32,

    // Inter-tick latency stats (ns).
    pub last_tick_latency_exa_ns: u64,
    pub last_tick_latency_exb_ns: u64,
    pub avg_tick_latency_exa_ns: u64,
    pub avg_tick_latency_exb_ns: u64,

    // Tick-to-trade latency (ns).
    pub last_tick_to_trade_ns: u64,

    // Safety flags.
    pub circuit_tripped: i32,
    pub rate_limited: i32,

    // Performance metrics.
    pub last_trade_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub equity_high: f64,
    pub max_drawdown: f64,
}

/// The atomic post-trade update bundle, applied under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub spread_exa_to_exb: f64,
    pub spread_exb_to_exa: f64,
    pub t_send_ns: u64,
    pub tick_to_trade_ns: u64,
    pub pnl: f64,
}

impl CoreState {
    /// All-zero record. Every field is valid at zero; the creator overlays
    /// the default strategy parameters afterwards.
    pub fn zeroed() -> Self {
        // Safety: CoreState is repr(C) POD built from integers and floats.
        unsafe { std::mem::zeroed() }
    }

    #[inline]
    pub fn quote(&self, venue: Venue) -> &ExchangeQuote {
        match venue {
            Venue::Exa => &self.exa,
            Venue::Exb => &self.exb,
        }
    }

    #[inline]
    pub fn quote_mut(&mut self, venue: Venue) -> &mut ExchangeQuote {
        match venue {
            Venue::Exa => &mut self.exa,
            Venue::Exb => &mut self.exb,
        }
    }

    /// Whether the evaluator is switched off. Any non-OFF mode evaluates;
    /// MONITOR is an observer-facing label the core does not distinguish
    /// from PAPER.
    #[inline]
    pub fn mode_is_off(&self) -> bool {
        self.strategy_mode == StrategyMode::Off.as_raw()
    }

    /// Publish one received tick into the venue's slot and refresh the
    /// inter-tick latency stats.
    ///
    /// The interval is measured only once a baseline exists
    /// (`last_update_ns > 0`) and the clock moved forward; the first tick
    /// per venue sets the baseline without touching the stats.
    pub fn apply_tick(&mut self, venue: Venue, tick: &TickMsg, t_recv_ns: u64) {
        let quote = self.quote_mut(venue);

        let mut interval_ns = 0;
        if quote.last_update_ns > 0 && t_recv_ns > quote.last_update_ns {
            interval_ns = t_recv_ns - quote.last_update_ns;
        }

        quote.bid = tick.bid;
        quote.ask = tick.ask;
        quote.seq = tick.seq;
        quote.last_update_ns = t_recv_ns;
        quote.connected = 1;

        if interval_ns > 0 {
            match venue {
                Venue::Exa => {
                    self.last_tick_latency_exa_ns = interval_ns;
                    self.avg_tick_latency_exa_ns =
                        ema_ns(self.avg_tick_latency_exa_ns, interval_ns);
                }
                Venue::Exb => {
                    self.last_tick_latency_exb_ns = interval_ns;
                    self.avg_tick_latency_exb_ns =
                        ema_ns(self.avg_tick_latency_exb_ns, interval_ns);
                }
            }
        }
    }

    /// Write back the two directional spreads without recording a trade.
    #[inline]
    pub fn record_spreads(&mut self, spread_exa_to_exb: f64, spread_exb_to_exa: f64) {
        self.last_spread_exa_to_exb = spread_exa_to_exb;
        self.last_spread_exb_to_exa = spread_exb_to_exa;
    }

    /// Apply the full post-trade metric bundle: spreads, timestamps, PnL,
    /// win/loss tallies, equity curve, drawdown and the circuit breaker.
    ///
    /// A trade with `pnl >= 0` counts as winning, so
    /// `trades_count == winning_trades + losing_trades` always holds.
    /// Crossing `pnl_limit` downwards trips the circuit and forces the
    /// strategy off; only an external actor clears either.
    pub fn record_trade(&mut self, outcome: &TradeOutcome, pnl_limit: f64) {
        self.last_spread_exa_to_exb = outcome.spread_exa_to_exb;
        self.last_spread_exb_to_exa = outcome.spread_exb_to_exa;
        self.last_trade_ts_ns = outcome.t_send_ns;
        self.last_tick_to_trade_ns = outcome.tick_to_trade_ns;

        self.last_trade_pnl = outcome.pnl;
        self.cumulative_pnl += outcome.pnl;
        self.trades_count += 1;

        if outcome.pnl >= 0.0 {
            self.gross_profit += outcome.pnl;
            self.winning_trades += 1;
        } else {
            self.gross_loss += -outcome.pnl;
            self.losing_trades += 1;
        }

        if self.trades_count == 1 {
            self.equity_high = self.cumulative_pnl;
            self.max_drawdown = 0.0;
        } else {
            if self.cumulative_pnl > self.equity_high {
                self.equity_high = self.cumulative_pnl;
            }
            let drawdown = self.cumulative_pnl - self.equity_high;
            if drawdown < self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }

        if self.cumulative_pnl < pnl_limit {
            self.circuit_tripped = 1;
            self.strategy_mode = StrategyMode::Off.as_raw();
        }
    }

    /// Gross profit over gross loss. `None` when no losing trade has been
    /// recorded yet; observers render that as N/A.
    pub fn profit_factor(&self) -> Option<f64> {
        if self.gross_loss == 0.0 {
            None
        } else {
            Some(self.gross_profit / self.gross_loss)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNL_LIMIT: f64 = -100.0;

    fn tick(bid: f64, ask: f64, seq: u64) -> TickMsg {
        TickMsg {
            exch: "EXA".to_string(),
            symbol: "BTCUSD".to_string(),
            bid,
            ask,
            seq,
            ts_ns: 0,
        }
    }

    fn outcome(pnl: f64, t_send_ns: u64) -> TradeOutcome {
        TradeOutcome {
            spread_exa_to_exb: 0.15,
            spread_exb_to_exa: -0.25,
            t_send_ns,
            tick_to_trade_ns: 1_000,
            pnl,
        }
    }

    #[test]
    fn first_tick_sets_baseline_without_interval() {
        let mut state = CoreState::zeroed();
        state.apply_tick(Venue::Exa, &tick(100.0, 100.05, 1), 5_000);

        assert_eq!(state.exa.bid, 100.0);
        assert_eq!(state.exa.ask, 100.05);
        assert_eq!(state.exa.seq, 1);
        assert_eq!(state.exa.last_update_ns, 5_000);
        assert_eq!(state.exa.connected, 1);
        assert_eq!(state.last_tick_latency_exa_ns, 0);
        assert_eq!(state.avg_tick_latency_exa_ns, 0);
    }

    #[test]
    fn second_tick_initializes_ema_to_first_interval() {
        let mut state = CoreState::zeroed();
        state.apply_tick(Venue::Exb, &tick(1.0, 2.0, 1), 1_000);
        state.apply_tick(Venue::Exb, &tick(1.0, 2.0, 2), 4_000);

        assert_eq!(state.last_tick_latency_exb_ns, 3_000);
        assert_eq!(state.avg_tick_latency_exb_ns, 3_000);
        // EXA stats untouched.
        assert_eq!(state.avg_tick_latency_exa_ns, 0);
    }

    #[test]
    fn third_tick_applies_ema_step() {
        let mut state = CoreState::zeroed();
        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 1), 0);
        // last_update_ns == 0 after a t_recv of 0 still counts as no baseline.
        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 2), 1_000_000);
        assert_eq!(state.avg_tick_latency_exa_ns, 0);

        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 3), 2_000_000);
        assert_eq!(state.avg_tick_latency_exa_ns, 1_000_000);

        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 4), 4_000_000);
        // 0.9 * 1ms + 0.1 * 2ms
        assert_eq!(state.avg_tick_latency_exa_ns, 1_100_000);
    }

    #[test]
    fn stale_clock_sample_does_not_produce_interval() {
        let mut state = CoreState::zeroed();
        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 1), 10_000);
        state.apply_tick(Venue::Exa, &tick(1.0, 2.0, 2), 10_000);

        assert_eq!(state.last_tick_latency_exa_ns, 0);
        assert_eq!(state.exa.seq, 2);
    }

    #[test]
    fn freshness_threshold_is_strict() {
        let mut quote = ExchangeQuote::default();
        quote.connected = 1;
        quote.last_update_ns = 1_000_000_000;

        let threshold = 500_000_000;
        assert!(quote.is_fresh(1_000_000_000 + threshold - 1, threshold));
        // Age exactly at the threshold is stale.
        assert!(!quote.is_fresh(1_000_000_000 + threshold, threshold));
    }

    #[test]
    fn disconnected_quote_is_never_fresh() {
        let quote = ExchangeQuote {
            last_update_ns: 1_000,
            ..Default::default()
        };
        assert!(!quote.is_fresh(1_001, 500_000_000));
    }

    #[test]
    fn record_trade_scenario_arithmetic() {
        // Buy EXA at 100.05, sell EXB at 100.20, size 0.01.
        let mut state = CoreState::zeroed();
        state.trade_size = 0.01;
        let pnl = (100.20 - 100.05) * state.trade_size;
        state.record_trade(&outcome(pnl, 42), PNL_LIMIT);

        assert_eq!(state.trades_count, 1);
        assert_eq!(state.winning_trades, 1);
        assert_eq!(state.losing_trades, 0);
        assert!((state.last_trade_pnl - 0.0015).abs() < 1e-9);
        assert!((state.cumulative_pnl - 0.0015).abs() < 1e-9);
        assert_eq!(state.last_trade_ts_ns, 42);
        assert_eq!(state.last_tick_to_trade_ns, 1_000);
        assert_eq!(state.circuit_tripped, 0);
    }

    #[test]
    fn zero_pnl_counts_as_winning() {
        let mut state = CoreState::zeroed();
        state.record_trade(&outcome(0.0, 1), PNL_LIMIT);
        assert_eq!(state.winning_trades, 1);
        assert_eq!(state.losing_trades, 0);
        assert_eq!(state.gross_profit, 0.0);
    }

    #[test]
    fn trade_count_identity_holds_across_mixed_outcomes() {
        let mut state = CoreState::zeroed();
        for (i, pnl) in [1.5, -0.5, 0.0, -2.0, 3.0].iter().enumerate() {
            state.record_trade(&outcome(*pnl, i as u64), PNL_LIMIT);
            assert_eq!(
                state.trades_count,
                state.winning_trades + state.losing_trades
            );
            assert!(state.equity_high >= state.cumulative_pnl);
            assert!(state.max_drawdown <= 0.0);
        }
        assert_eq!(state.winning_trades, 3);
        assert_eq!(state.losing_trades, 2);
        assert!((state.gross_profit - 4.5).abs() < 1e-12);
        assert!((state.gross_loss - 2.5).abs() < 1e-12);
    }

    #[test]
    fn equity_curve_and_drawdown() {
        let mut state = CoreState::zeroed();

        state.record_trade(&outcome(2.0, 1), PNL_LIMIT);
        assert_eq!(state.equity_high, 2.0);
        assert_eq!(state.max_drawdown, 0.0);

        state.record_trade(&outcome(-3.0, 2), PNL_LIMIT);
        assert_eq!(state.equity_high, 2.0);
        assert_eq!(state.max_drawdown, -3.0);

        state.record_trade(&outcome(5.0, 3), PNL_LIMIT);
        assert_eq!(state.equity_high, 4.0);
        assert_eq!(state.max_drawdown, -3.0);

        state.record_trade(&outcome(-1.0, 4), PNL_LIMIT);
        assert_eq!(state.equity_high, 4.0);
        assert_eq!(state.max_drawdown, -3.0);
    }

    #[test]
    fn first_trade_with_loss_pins_drawdown_at_zero() {
        let mut state = CoreState::zeroed();
        state.record_trade(&outcome(-1.0, 1), PNL_LIMIT);
        assert_eq!(state.equity_high, -1.0);
        assert_eq!(state.max_drawdown, 0.0);
    }

    #[test]
    fn circuit_trips_below_limit_and_forces_off() {
        let mut state = CoreState::zeroed();
        state.strategy_mode = StrategyMode::Paper.as_raw();

        state.record_trade(&outcome(-100.0, 1), PNL_LIMIT);
        // Exactly at the limit does not trip (strict less-than).
        assert_eq!(state.circuit_tripped, 0);
        assert_eq!(state.strategy_mode, StrategyMode::Paper.as_raw());

        state.record_trade(&outcome(-0.5, 2), PNL_LIMIT);
        assert_eq!(state.circuit_tripped, 1);
        assert_eq!(state.strategy_mode, StrategyMode::Off.as_raw());
        assert!(state.mode_is_off());
    }

    #[test]
    fn mode_toggle_has_no_metric_side_effects() {
        let mut state = CoreState::zeroed();
        state.record_trade(&outcome(1.0, 1), PNL_LIMIT);
        let before = state;

        state.strategy_mode = StrategyMode::Off.as_raw();
        state.strategy_mode = StrategyMode::Paper.as_raw();

        assert_eq!(state.trades_count, before.trades_count);
        assert_eq!(state.cumulative_pnl, before.cumulative_pnl);
        assert_eq!(state.equity_high, before.equity_high);
        assert_eq!(state.gross_profit, before.gross_profit);
    }

    #[test]
    fn profit_factor_is_none_without_losses() {
        let mut state = CoreState::zeroed();
        state.record_trade(&outcome(2.0, 1), PNL_LIMIT);
        assert_eq!(state.profit_factor(), None);

        state.record_trade(&outcome(-1.0, 2), PNL_LIMIT);
        assert_eq!(state.profit_factor(), Some(2.0));
    }
}
