//! Trade destination resolution and the egress socket.
//!
//! The trade port is configuration; the trade IP is learned from the
//! first feed datagram either receiver sees (or supplied up front with
//! `--trade-host`). [`TradeRoute`] is the one-shot cell holding that IP:
//! it arms exactly once per process lifetime and is guarded by its own
//! in-process mutex, never nested with the shared-state lock.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use anyhow::{Context, Result};
use parking_lot::Mutex;

/// One-shot trade destination cell.
#[derive(Debug, Default)]
pub struct TradeRoute {
    ip: Mutex<Option<IpAddr>>,
}

impl TradeRoute {
    /// An unarmed route; the first feed packet will arm it.
    pub fn new() -> Self {
        Self::default()
    }

    /// A route armed from configuration, skipping inference entirely.
    pub fn pre_armed(ip: IpAddr) -> Self {
        Self {
            ip: Mutex::new(Some(ip)),
        }
    }

    /// Arm the route with `ip` if it is not armed yet. Returns whether
    /// this call performed the false→true transition.
    pub fn arm(&self, ip: IpAddr) -> bool {
        let mut slot = self.ip.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(ip);
        true
    }

    /// Snapshot the armed address, if any.
    #[inline]
    pub fn get(&self) -> Option<IpAddr> {
        *self.ip.lock()
    }

    /// Cheap armed check for the fast path of the receivers.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.ip.lock().is_some()
    }
}

/// Egress UDP socket for trade datagrams. Owned and used exclusively by
/// the strategy evaluator thread.
#[derive(Debug)]
pub struct TradeSender {
    socket: UdpSocket,
    port: u16,
}

impl TradeSender {
    /// Bind an ephemeral local socket; the destination port is fixed at
    /// construction.
    pub fn new(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
            .context("bind trade socket")?;
        Ok(Self { socket, port })
    }

    /// Destination port for every emitted trade.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Fire one trade datagram at `(ip, configured port)`.
    pub fn send(&self, ip: IpAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, SocketAddr::from((ip, self.port)))
    }
}
