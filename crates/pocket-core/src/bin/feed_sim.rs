//! Synthetic two-venue feed generator.
//!
//! Drives a local core for demos and end-to-end checks: alternates EXA
//! and EXB ticks around a drifting mid price, and occasionally lifts the
//! EXB book above the EXA ask so the spread condition fires.
//!
//! Usage:
//!   feed-sim [--host 127.0.0.1] [--exa-port 6001] [--exb-port 6002]
//!            [--interval-ms 50] [--cross-probability 0.2] [--count N]

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;

use pocket_common::clock::now_ns;
use pocket_common::types::Venue;
use pocket_common::wire::{format_tick, TickMsg};

#[derive(Parser, Debug)]
#[command(name = "feed-sim")]
#[command(about = "Synthetic two-venue tick generator")]
struct Args {
    /// Destination host running the core.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// EXA feed port.
    #[arg(long, default_value_t = 6001)]
    exa_port: u16,

    /// EXB feed port.
    #[arg(long, default_value_t = 6002)]
    exb_port: u16,

    /// Symbol carried on every tick.
    #[arg(long, default_value = "BTCUSD")]
    symbol: String,

    /// Starting mid price.
    #[arg(long, default_value_t = 100.0)]
    mid: f64,

    /// Half of the bid/ask spread on each venue.
    #[arg(long, default_value_t = 0.05)]
    half_spread: f64,

    /// Delay between consecutive ticks.
    #[arg(long, default_value_t = 50)]
    interval_ms: u64,

    /// Probability that an EXB tick crosses the EXA book.
    #[arg(long, default_value_t = 0.2)]
    cross_probability: f64,

    /// Total ticks to send; 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    count: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cross_probability = args.cross_probability.clamp(0.0, 1.0);

    let socket = UdpSocket::bind("0.0.0.0:0").context("bind sender socket")?;
    let mut rng = rand::thread_rng();

    let mut mid = args.mid;
    let mut seq = [0u64; 2];
    let mut sent = 0u64;

    eprintln!(
        "feed-sim: host={} exa_port={} exb_port={} interval_ms={} cross_probability={}",
        args.host, args.exa_port, args.exb_port, args.interval_ms, cross_probability
    );

    loop {
        for venue in [Venue::Exa, Venue::Exb] {
            mid += rng.gen_range(-0.02..0.02);

            // Lifting the whole EXB book above the EXA ask produces a
            // positive EXA->EXB spread without inverting either venue.
            let skew = if venue == Venue::Exb && rng.gen_bool(cross_probability) {
                args.half_spread * 4.0
            } else {
                0.0
            };

            let slot = (venue == Venue::Exb) as usize;
            seq[slot] += 1;
            let tick = TickMsg {
                exch: venue.label().to_string(),
                symbol: args.symbol.clone(),
                bid: mid - args.half_spread + skew,
                ask: mid + args.half_spread + skew,
                seq: seq[slot],
                ts_ns: now_ns(),
            };

            let port = match venue {
                Venue::Exa => args.exa_port,
                Venue::Exb => args.exb_port,
            };
            socket
                .send_to(
                    format_tick(&tick).as_bytes(),
                    SocketAddr::from((args.host, port)),
                )
                .with_context(|| format!("send tick to {venue}"))?;

            sent += 1;
            if args.count > 0 && sent >= args.count {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }
}
