//! Per-trade latency CSV.
//!
//! One row per emitted trade, flushed immediately so the file is usable
//! while the core runs. Written only by the strategy evaluator, outside
//! the shared-state lock.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Default log file name, created in the working directory.
pub const LATENCY_LOG_FILE: &str = "latency_log.csv";

const HEADER: [&str; 4] = [
    "t_now_ns",
    "tick_to_trade_ns",
    "exa_avg_tick_interval_ns",
    "exb_avg_tick_interval_ns",
];

/// One logged trade emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyRow {
    /// Monotonic time of the log write itself.
    pub t_now_ns: u64,
    /// Elapsed ns from the newer contributing tick to the send instant.
    pub tick_to_trade_ns: u64,
    /// EXA inter-tick EMA at the time of the snapshot.
    pub exa_avg_tick_interval_ns: u64,
    /// EXB inter-tick EMA at the time of the snapshot.
    pub exb_avg_tick_interval_ns: u64,
}

/// Append-only CSV writer for latency samples.
pub struct LatencyLog {
    writer: csv::Writer<File>,
}

impl LatencyLog {
    /// Create (truncating) the log file and write the header row eagerly,
    /// so the header exists even if no trade ever fires.
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("create latency log {}", path.display()))?;
        writer.write_record(HEADER).context("write latency log header")?;
        writer.flush().context("flush latency log header")?;
        Ok(Self { writer })
    }

    /// Append and flush one row.
    pub fn append(&mut self, row: &LatencyRow) -> Result<()> {
        self.writer.serialize(row).context("write latency log row")?;
        self.writer.flush().context("flush latency log row")?;
        Ok(())
    }
}
