//! Shared types and utilities for the pockettrader core.
//!
//! This crate contains:
//! - Common types (Venue, StrategyMode, Side)
//! - The ASCII wire codec for TICK and TRADE datagrams
//! - Monotonic clock and inter-tick EMA helpers
//!
//! It is deliberately small: anything an out-of-process tool (feed
//! simulator, trade bridge, observer) needs to speak to the core lives
//! here, everything process-internal lives in `pocket-core`.

pub mod clock;
pub mod types;
pub mod wire;

pub use clock::{ema_ns, now_ns, NANOS_PER_SEC, TICK_INTERVAL_EMA_ALPHA};
pub use types::{Side, StrategyMode, Venue};
pub use wire::{format_tick, parse_tick, parse_trade, TickMsg, TradeMsg, WireError};
