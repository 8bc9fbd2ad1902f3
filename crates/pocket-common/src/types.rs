//! Core identifiers shared between the dataplane and external tools.

use std::fmt;
use std::str::FromStr;

/// Venue identity. The two venues are symbolic labels, not references to
/// real exchanges; each one owns a feed port and one slot in the shared
/// state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    /// First venue, feed on the EXA port.
    Exa,
    /// Second venue, feed on the EXB port.
    Exb,
}

impl Venue {
    /// Wire label as it appears in TICK and TRADE records.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Venue::Exa => "EXA",
            Venue::Exb => "EXB",
        }
    }

    /// The opposing venue.
    #[inline]
    pub fn other(self) -> Venue {
        match self {
            Venue::Exa => Venue::Exb,
            Venue::Exb => Venue::Exa,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Strategy mode as stored in the shared record.
///
/// The raw `i32` representation is part of the shared-memory contract:
/// external observers read and write the numeric value directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StrategyMode {
    /// Evaluator gates closed, nothing is emitted.
    Off = 0,
    /// Observer-facing label; the core evaluates and emits as in Paper.
    Monitor = 1,
    /// Paper trading: trades are emitted as datagrams, never routed.
    Paper = 2,
}

impl StrategyMode {
    /// Raw value stored in the shared record.
    #[inline]
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Decode a raw shared-record value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(StrategyMode::Off),
            1 => Some(StrategyMode::Monitor),
            2 => Some(StrategyMode::Paper),
            _ => None,
        }
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(StrategyMode::Off),
            "monitor" => Ok(StrategyMode::Monitor),
            "paper" => Ok(StrategyMode::Paper),
            other => Err(format!("unknown strategy mode: {other}")),
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyMode::Off => write!(f, "off"),
            StrategyMode::Monitor => write!(f, "monitor"),
            StrategyMode::Paper => write!(f, "paper"),
        }
    }
}

/// Order side on one leg of an emitted trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Wire label as it appears in TRADE records.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}
