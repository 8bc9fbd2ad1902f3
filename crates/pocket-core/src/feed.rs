//! Ingress feed receivers, one per venue.
//!
//! Each receiver owns one UDP socket bound to its venue's port, parses
//! single-line ASCII ticks, and publishes them into the shared record
//! under the region lock. The venue's identity comes from the ingress
//! port, not from the label inside the datagram.
//!
//! The first datagram either receiver sees also arms the trade route with
//! the sender's source IP (done outside the lock).

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use pocket_common::clock::now_ns;
use pocket_common::types::Venue;
use pocket_common::wire::parse_tick;

use crate::shm::SharedState;
use crate::trade::TradeRoute;

/// Receive-buffer request for the feed sockets; the kernel clamps to
/// `rmem_max`, so a shortfall is logged rather than fatal.
const FEED_RECV_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Read timeout on feed sockets. Shutdown is cooperative: a signal that
/// lands between the run-flag check and `recv_from` only delays exit by
/// one timeout instead of stranding the join.
const FEED_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Largest accepted tick datagram.
const FEED_DATAGRAM_MAX: usize = 256;

/// Bind and tune one venue's feed socket.
pub fn bind_feed_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("create feed socket")?;
    socket
        .set_reuse_address(true)
        .context("set SO_REUSEADDR on feed socket")?;
    if let Err(e) = socket.set_recv_buffer_size(FEED_RECV_BUFFER_BYTES) {
        warn!(port, "feed socket receive buffer request failed: {e}");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind feed socket on {addr}"))?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(FEED_READ_TIMEOUT))
        .context("set feed socket read timeout")?;
    Ok(socket)
}

/// One venue's ingress worker.
pub struct FeedReceiver {
    venue: Venue,
    socket: UdpSocket,
    shared: Arc<SharedState>,
    route: Arc<TradeRoute>,
}

impl FeedReceiver {
    pub fn new(
        venue: Venue,
        socket: UdpSocket,
        shared: Arc<SharedState>,
        route: Arc<TradeRoute>,
    ) -> Self {
        Self {
            venue,
            socket,
            shared,
            route,
        }
    }

    /// Receive loop. Returns when `running` clears or the socket fails
    /// with a non-transient error.
    pub fn run(&self, running: &AtomicBool) {
        let mut buf = [0u8; FEED_DATAGRAM_MAX];

        while running.load(Ordering::Acquire) {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!(venue = %self.venue, "feed socket error, stopping receiver: {e}");
                    break;
                }
            };
            if n == 0 {
                continue;
            }

            self.handle_datagram(&buf[..n], src);
        }
        debug!(venue = %self.venue, "feed receiver exiting");
    }

    fn handle_datagram(&self, payload: &[u8], src: SocketAddr) {
        let line = match std::str::from_utf8(payload) {
            Ok(line) => line,
            Err(_) => {
                error!(venue = %self.venue, "bad TICK message: not UTF-8 ({} bytes)", payload.len());
                return;
            }
        };

        let tick = match parse_tick(line) {
            Ok(tick) => tick,
            Err(e) => {
                error!(venue = %self.venue, "bad TICK message: {e}: {:?}", line.trim_end());
                return;
            }
        };

        let t_recv = now_ns();
        self.shared
            .with_lock(|state| state.apply_tick(self.venue, &tick, t_recv));

        if !self.route.is_armed() && self.route.arm(src.ip()) {
            info!(
                venue = %self.venue,
                "trade destination learned from first feed packet: {}",
                src.ip()
            );
        }
    }
}
