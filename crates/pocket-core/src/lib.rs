//! Two-venue arbitrage execution core.
//!
//! Ingests best-bid/offer ticks from two UDP feeds (EXA and EXB), keeps a
//! consistent view of both books in a POSIX shared-memory record guarded
//! by a process-shared mutex, evaluates the cross-venue spread on every
//! update, and emits paper trades over a datagram channel — while any
//! number of external observer processes read and tune the same record.
//!
//! ## Modules
//!
//! - `config`: CLI/TOML configuration, defaults and validation
//! - `state`: the `#[repr(C)]` shared record and its update rules
//! - `shm`: shared-memory region and process-shared mutex lifecycle
//! - `feed`: per-venue UDP feed receivers
//! - `strategy`: the spinning evaluator (gates, decision, emit, metrics)
//! - `trade`: one-shot trade destination cell and egress socket
//! - `latency_log`: per-trade CSV latency samples
//! - `runtime`: threads, signals and shutdown

pub mod config;
pub mod feed;
pub mod latency_log;
pub mod runtime;
pub mod shm;
pub mod state;
pub mod strategy;
pub mod trade;

pub use config::{CoreConfig, FeedParams, RiskParams, StrategyParams};
pub use feed::{bind_feed_socket, FeedReceiver};
pub use latency_log::{LatencyLog, LatencyRow, LATENCY_LOG_FILE};
pub use shm::{SharedState, SHM_MAGIC, SHM_NAME};
pub use state::{CoreState, ExchangeQuote, TradeOutcome};
pub use strategy::{decide, ArbDecision, Evaluator, EvaluatorConfig, SpreadDirection};
pub use trade::{TradeRoute, TradeSender};
