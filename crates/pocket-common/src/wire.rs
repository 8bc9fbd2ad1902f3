//! ASCII wire codec for feed and trade datagrams.
//!
//! Both directions carry one whitespace-separated record per datagram:
//!
//! - Ingress: `TICK <exch> <symbol> <bid> <ask> <seq> <ts_ns>`
//! - Egress:  `TRADE ARB1 <legA_exch> <legA_side> <legA_price> <legB_exch>
//!   <legB_side> <legB_price> <size> <spread> <t_send_ns>`
//!
//! The sender's `ts_ns` on a tick is informational only; the core stamps
//! its own monotonic receive time. Prices on the trade record are fixed
//! at six decimal places.

use std::str::FromStr;

use thiserror::Error;

use crate::types::Side;

/// Leading keyword of a feed record.
pub const TICK_KEYWORD: &str = "TICK";
/// Leading keyword of a trade record.
pub const TRADE_KEYWORD: &str = "TRADE";
/// Fixed strategy tag on every emitted trade.
pub const TRADE_STRATEGY_TAG: &str = "ARB1";

/// Maximum accepted exchange label length.
pub const MAX_EXCH_LEN: usize = 7;
/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 15;

/// Decode failure for an inbound datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("not a {0} record")]
    WrongKeyword(&'static str),
    #[error("expected {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("invalid {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// One parsed feed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickMsg {
    pub exch: String,
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub seq: u64,
    /// Sender-side timestamp, carried through but never trusted.
    pub ts_ns: u64,
}

/// One emitted paper trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMsg {
    pub leg_a_exch: String,
    pub leg_a_side: Side,
    pub leg_a_price: f64,
    pub leg_b_exch: String,
    pub leg_b_side: Side,
    pub leg_b_price: f64,
    pub size: f64,
    pub spread: f64,
    pub t_send_ns: u64,
}

fn parse_field<T: FromStr>(token: &str, field: &'static str) -> Result<T, WireError> {
    token.parse().map_err(|_| WireError::InvalidField {
        field,
        value: token.to_string(),
    })
}

fn truncate(token: &str, max_len: usize) -> String {
    token.chars().take(max_len).collect()
}

/// Parse a `TICK` record.
///
/// Labels longer than the wire limits are truncated rather than rejected;
/// the core identifies the venue by ingress port, not by label.
pub fn parse_tick(line: &str) -> Result<TickMsg, WireError> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some(TICK_KEYWORD) => {}
        _ => return Err(WireError::WrongKeyword(TICK_KEYWORD)),
    }

    let rest: Vec<&str> = tokens.collect();
    if rest.len() < 6 {
        return Err(WireError::MissingFields {
            expected: 6,
            got: rest.len(),
        });
    }

    Ok(TickMsg {
        exch: truncate(rest[0], MAX_EXCH_LEN),
        symbol: truncate(rest[1], MAX_SYMBOL_LEN),
        bid: parse_field(rest[2], "bid")?,
        ask: parse_field(rest[3], "ask")?,
        seq: parse_field(rest[4], "seq")?,
        ts_ns: parse_field(rest[5], "ts_ns")?,
    })
}

/// Encode a `TICK` record.
pub fn format_tick(tick: &TickMsg) -> String {
    format!(
        "{} {} {} {:.2} {:.2} {} {}",
        TICK_KEYWORD, tick.exch, tick.symbol, tick.bid, tick.ask, tick.seq, tick.ts_ns
    )
}

impl TradeMsg {
    /// Encode into the egress datagram payload.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {:.6} {} {} {:.6} {:.6} {:.6} {}",
            TRADE_KEYWORD,
            TRADE_STRATEGY_TAG,
            self.leg_a_exch,
            self.leg_a_side,
            self.leg_a_price,
            self.leg_b_exch,
            self.leg_b_side,
            self.leg_b_price,
            self.size,
            self.spread,
            self.t_send_ns
        )
    }
}

/// Parse a `TRADE` record (for bridges and tests; the core only encodes).
pub fn parse_trade(line: &str) -> Result<TradeMsg, WireError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&TRADE_KEYWORD) {
        return Err(WireError::WrongKeyword(TRADE_KEYWORD));
    }
    if tokens.len() < 11 {
        return Err(WireError::MissingFields {
            expected: 11,
            got: tokens.len(),
        });
    }
    if tokens[1] != TRADE_STRATEGY_TAG {
        return Err(WireError::InvalidField {
            field: "strategy",
            value: tokens[1].to_string(),
        });
    }

    Ok(TradeMsg {
        leg_a_exch: tokens[2].to_string(),
        leg_a_side: tokens[3]
            .parse()
            .map_err(|_| WireError::InvalidField {
                field: "legA_side",
                value: tokens[3].to_string(),
            })?,
        leg_a_price: parse_field(tokens[4], "legA_price")?,
        leg_b_exch: tokens[5].to_string(),
        leg_b_side: tokens[6]
            .parse()
            .map_err(|_| WireError::InvalidField {
                field: "legB_side",
                value: tokens[6].to_string(),
            })?,
        leg_b_price: parse_field(tokens[7], "legB_price")?,
        size: parse_field(tokens[8], "size")?,
        spread: parse_field(tokens[9], "spread")?,
        t_send_ns: parse_field(tokens[10], "t_send_ns")?,
    })
}
