//! Configuration for the pockettrader core.
//!
//! Ports and the trade-sink override come from the CLI; strategy and risk
//! tuning can additionally be loaded from an optional TOML file, with CLI
//! values applied last. Absent both, the compiled-in defaults match the
//! parameters the creator writes into a fresh shared region.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use pocket_common::types::StrategyMode;

/// Default EXA feed port.
pub const DEFAULT_EXA_PORT: u16 = 6001;
/// Default EXB feed port.
pub const DEFAULT_EXB_PORT: u16 = 6002;
/// Default trade datagram port.
pub const DEFAULT_TRADE_PORT: u16 = 7000;

/// Default minimum spread threshold.
pub const DEFAULT_MIN_SPREAD: f64 = 0.10;
/// Default paper trade size.
pub const DEFAULT_TRADE_SIZE: f64 = 0.01;
/// Default quote staleness threshold.
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 500;
/// Default cap on trades per rolling second.
pub const DEFAULT_MAX_TRADES_PER_SECOND: u32 = 20;
/// Default cumulative-PnL floor below which the circuit trips.
pub const DEFAULT_PNL_LIMIT: f64 = -100.0;

/// Strategy parameters written into a freshly created shared region.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    /// Non-negative spread threshold; a spread exactly equal to it fires.
    pub min_spread: f64,
    /// Paper position size per emitted trade.
    pub trade_size: f64,
    /// Initial strategy mode.
    pub mode: StrategyMode,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_spread: DEFAULT_MIN_SPREAD,
            trade_size: DEFAULT_TRADE_SIZE,
            mode: StrategyMode::Paper,
        }
    }
}

/// Evaluator risk constants.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParams {
    /// Circuit breaker floor: trips when cumulative PnL drops strictly
    /// below this (negative) value.
    pub pnl_limit: f64,
    /// Trades allowed per rolling one-second window.
    pub max_trades_per_second: u32,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            pnl_limit: DEFAULT_PNL_LIMIT,
            max_trades_per_second: DEFAULT_MAX_TRADES_PER_SECOND,
        }
    }
}

/// Feed freshness tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedParams {
    /// A quote older than this is stale and blocks the evaluator.
    pub stale_threshold_ms: u64,
}

impl FeedParams {
    #[inline]
    pub fn stale_threshold_ns(&self) -> u64 {
        self.stale_threshold_ms * 1_000_000
    }
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
        }
    }
}

/// Top-level core configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub exa_port: u16,
    pub exb_port: u16,
    pub trade_port: u16,
    /// Explicit trade-sink IP. When set, the first-packet inference is
    /// skipped and the resolver starts armed.
    pub trade_host: Option<IpAddr>,
    pub log_level: String,
    pub strategy: StrategyParams,
    pub risk: RiskParams,
    pub feeds: FeedParams,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            exa_port: DEFAULT_EXA_PORT,
            exb_port: DEFAULT_EXB_PORT,
            trade_port: DEFAULT_TRADE_PORT,
            trade_host: None,
            log_level: "info".to_string(),
            strategy: StrategyParams::default(),
            risk: RiskParams::default(),
            feeds: FeedParams::default(),
        }
    }
}

/// TOML file shape. Every field is optional; missing values keep the
/// compiled-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    strategy: FileStrategy,
    risk: FileRisk,
    feeds: FileFeeds,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileStrategy {
    min_spread: Option<f64>,
    trade_size: Option<f64>,
    mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileRisk {
    pnl_limit: Option<f64>,
    max_trades_per_second: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileFeeds {
    stale_threshold_ms: Option<u64>,
}

impl CoreConfig {
    /// Load configuration from a TOML file, layered over the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: FileConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        let mut config = Self::default();

        if let Some(min_spread) = file.strategy.min_spread {
            config.strategy.min_spread = min_spread;
        }
        if let Some(trade_size) = file.strategy.trade_size {
            config.strategy.trade_size = trade_size;
        }
        if let Some(mode) = file.strategy.mode {
            config.strategy.mode = mode
                .parse()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("invalid strategy.mode in {}", path.display()))?;
        }
        if let Some(pnl_limit) = file.risk.pnl_limit {
            config.risk.pnl_limit = pnl_limit;
        }
        if let Some(max_trades) = file.risk.max_trades_per_second {
            config.risk.max_trades_per_second = max_trades;
        }
        if let Some(stale_ms) = file.feeds.stale_threshold_ms {
            config.feeds.stale_threshold_ms = stale_ms;
        }

        Ok(config)
    }

    /// Overlay the CLI values. CLI wins over the config file.
    pub fn apply_cli_overrides(
        &mut self,
        exa_port: u16,
        exb_port: u16,
        trade_port: u16,
        trade_host: Option<IpAddr>,
        log_level: String,
    ) {
        self.exa_port = exa_port;
        self.exb_port = exb_port;
        self.trade_port = trade_port;
        if trade_host.is_some() {
            self.trade_host = trade_host;
        }
        self.log_level = log_level;
    }

    /// Reject configurations the dataplane cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.exa_port == 0 || self.exb_port == 0 || self.trade_port == 0 {
            bail!("ports must be nonzero");
        }
        if self.exa_port == self.exb_port {
            bail!(
                "EXA and EXB feeds cannot share port {} (one socket per venue)",
                self.exa_port
            );
        }
        if !self.strategy.min_spread.is_finite() || self.strategy.min_spread < 0.0 {
            bail!("strategy.min_spread must be a non-negative number");
        }
        if !self.strategy.trade_size.is_finite() || self.strategy.trade_size < 0.0 {
            bail!("strategy.trade_size must be a non-negative number");
        }
        if self.risk.max_trades_per_second == 0 {
            bail!("risk.max_trades_per_second must be at least 1");
        }
        if self.feeds.stale_threshold_ms == 0 {
            bail!("feeds.stale_threshold_ms must be at least 1");
        }
        Ok(())
    }
}
