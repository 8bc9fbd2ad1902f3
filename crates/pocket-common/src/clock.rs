//! Monotonic clock and inter-tick interval smoothing.
//!
//! Every timestamp in the system is a monotonic nanosecond reading from
//! `CLOCK_MONOTONIC`. Wall-clock time never enters the data model, so
//! readings stay comparable across the core's threads and across any
//! process mapping the shared record on the same host.

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Smoothing factor for the inter-tick interval EMA.
pub const TICK_INTERVAL_EMA_ALPHA: f64 = 0.1;

/// Current `CLOCK_MONOTONIC` reading in nanoseconds.
#[inline]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // clock_gettime(CLOCK_MONOTONIC) cannot fail with a valid timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * NANOS_PER_SEC + ts.tv_nsec as u64
}

/// One EMA step over inter-tick intervals.
///
/// The first non-zero sample initializes the average to itself so the
/// figure is meaningful after a single tick instead of warming up from
/// zero.
#[inline]
pub fn ema_ns(old_avg: u64, sample: u64) -> u64 {
    if old_avg == 0 {
        return sample;
    }
    ((1.0 - TICK_INTERVAL_EMA_ALPHA) * old_avg as f64 + TICK_INTERVAL_EMA_ALPHA * sample as f64)
        as u64
}
