//! Periodic database metering
//!
//! A [`MeteringLoop`] polls a [`StatsSource`] on a fixed interval and turns
//! the cumulative engine counters into per-interval gauges. Compaction
//! figures are double buffered by tick parity, so the first tick only seeds
//! them; delay and IO deltas are emitted from the first tick on.
//!
//! Gauges are keyed `["leveldb", <engine name>, <metric>]` and written to an
//! injected [`MetricsSink`].

use crate::config::{METERING_INTERVAL, WRITE_STALL_WARNING_INTERVAL};
use crate::engine::StatsSnapshot;
use crate::StoreError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// First segment of every gauge key
pub const GAUGE_ROOT: &str = "leveldb";

/// Destination for metering gauges
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, key: &[&str], value: f64);
}

/// Forwards gauges to the global `metrics` recorder as `leveldb.<name>.<metric>`
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn set_gauge(&self, key: &[&str], value: f64) {
        metrics::gauge!(key.join(".")).set(value);
    }
}

/// Anything that can produce a statistics snapshot
pub trait StatsSource: Send + Sync {
    fn stats_snapshot(&self) -> Result<StatsSnapshot, StoreError>;
}

/// What a single observation did besides emitting gauges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub stall_warning: bool,
}

/// Why the metering loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeteringExit {
    Cancelled,
    StatsUnavailable,
}

const DISK_SIZE: usize = 0;
const COMPACT_TIME: usize = 1;
const COMPACT_READ: usize = 2;
const COMPACT_WRITE: usize = 3;

/// Delta bookkeeping between ticks
#[derive(Debug)]
pub struct MeteringState {
    name: String,
    tick: u64,
    compactions: [[i64; 4]; 2],
    last_io: (i64, i64),
    last_delay: (i64, i64),
    last_write_stall_warning: Option<Instant>,
}

impl MeteringState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tick: 0,
            compactions: [[0; 4]; 2],
            last_io: (0, 0),
            last_delay: (0, 0),
            last_write_stall_warning: None,
        }
    }

    /// Number of snapshots observed so far
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Fold one snapshot into the state and emit its gauges
    pub fn observe(
        &mut self,
        stats: &StatsSnapshot,
        now: Instant,
        sink: &dyn MetricsSink,
    ) -> TickOutcome {
        self.tick += 1;
        let cur = (self.tick % 2) as usize;
        let prev = 1 - cur;

        self.compactions[cur] = [
            stats.level_sizes_sum,
            stats.level_compaction_durations_nanos.iter().sum(),
            stats.level_read_sum,
            stats.level_write_sum,
        ];

        if self.tick > 1 {
            let (now_buf, prev_buf) = (self.compactions[cur], self.compactions[prev]);
            self.emit(sink, "diskSize", now_buf[DISK_SIZE]);
            self.emit(sink, "compactTime", now_buf[COMPACT_TIME] - prev_buf[COMPACT_TIME]);
            self.emit(sink, "compactRead", now_buf[COMPACT_READ] - prev_buf[COMPACT_READ]);
            self.emit(sink, "compactWrite", now_buf[COMPACT_WRITE] - prev_buf[COMPACT_WRITE]);
        }

        let delay_count = stats.write_delay_count - self.last_delay.0;
        let delay_nanos = stats.write_delay_duration_nanos - self.last_delay.1;
        self.emit(sink, "writeDelayNMeter", delay_count);
        self.emit(sink, "writeDelayMeter", delay_nanos);

        let mut outcome = TickOutcome::default();
        let warning_due = self
            .last_write_stall_warning
            .map_or(true, |last| now.duration_since(last) >= WRITE_STALL_WARNING_INTERVAL);
        if stats.write_paused && delay_count == 0 && delay_nanos == 0 && warning_due {
            warn!("database compacting, degraded performance");
            self.last_write_stall_warning = Some(now);
            outcome.stall_warning = true;
        }
        self.last_delay = (stats.write_delay_count, stats.write_delay_duration_nanos);

        self.emit(sink, "diskRead", stats.io_read_bytes - self.last_io.0);
        self.emit(sink, "diskWrite", stats.io_write_bytes - self.last_io.1);
        self.last_io = (stats.io_read_bytes, stats.io_write_bytes);

        self.emit(sink, "memCompaction", stats.mem_compaction_count);
        self.emit(sink, "level0Compaction", stats.level0_compaction_count);
        self.emit(sink, "nonlevel0Compaction", stats.non_level0_compaction_count);
        self.emit(sink, "seekCompaction", stats.seek_compaction_count);

        for (level, count) in stats.level_table_counts.iter().enumerate() {
            self.emit(sink, &format!("level_{level}_tableCount"), *count);
        }

        outcome
    }

    fn emit(&self, sink: &dyn MetricsSink, metric: &str, value: i64) {
        sink.set_gauge(&[GAUGE_ROOT, &self.name, metric], value as f64);
    }
}

/// Polls a stats source until cancelled or the source fails
pub struct MeteringLoop {
    name: String,
    refresh: Duration,
    source: Arc<dyn StatsSource>,
    sink: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl MeteringLoop {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn StatsSource>,
        sink: Arc<dyn MetricsSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            refresh: METERING_INTERVAL,
            source,
            sink,
            cancel,
        }
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Run until cancellation or the first failed poll
    ///
    /// The first poll happens immediately, then once per `refresh`.
    pub async fn run(self) -> MeteringExit {
        let span = info_span!("metering", engine = %self.name);
        self.poll_loop().instrument(span).await
    }

    async fn poll_loop(self) -> MeteringExit {
        info!(refresh = ?self.refresh, "started metering");

        let mut state = MeteringState::new(self.name.clone());
        let mut interval = tokio::time::interval(self.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(ticks = state.ticks(), "metering cancelled");
                    return MeteringExit::Cancelled;
                }
                _ = interval.tick() => {}
            }

            match self.source.stats_snapshot() {
                Ok(stats) => {
                    state.observe(&stats, Instant::now(), self.sink.as_ref());
                }
                Err(_) if self.cancel.is_cancelled() => {
                    debug!("stats unavailable after cancellation");
                    return MeteringExit::Cancelled;
                }
                Err(e) => {
                    error!(error = %e, "failed to read database stats");
                    return MeteringExit::StatsUnavailable;
                }
            }
        }
    }
}
