//! Storage engine lifecycle
//!
//! [`StorageEngine`] owns one open [`Db`], translates engine errors into
//! [`StoreError`] at the boundary and runs a metering task for as long as
//! the database stays open.

use crate::limits::ProcessLimits;
use crate::metering::{MeteringLoop, MetricsSink, RecorderSink, StatsSource};
use crate::storage::{Db, DbStats};
use crate::tuning::{EngineConfigResolver, EngineOptions, TuningConfig};
use crate::{Error, StoreError};
use bytes::Bytes;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Engine statistics flattened for metering
///
/// `level_sizes_sum` and `level_table_counts` describe the current state;
/// every other field is cumulative since open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub level_sizes_sum: i64,
    pub level_compaction_durations_nanos: Vec<i64>,
    pub level_read_sum: i64,
    pub level_write_sum: i64,
    pub write_delay_count: i64,
    pub write_delay_duration_nanos: i64,
    pub write_paused: bool,
    pub io_read_bytes: i64,
    pub io_write_bytes: i64,
    pub mem_compaction_count: i64,
    pub level0_compaction_count: i64,
    pub non_level0_compaction_count: i64,
    pub seek_compaction_count: i64,
    pub level_table_counts: Vec<i64>,
}

fn to_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

impl From<&DbStats> for StatsSnapshot {
    fn from(stats: &DbStats) -> Self {
        Self {
            level_sizes_sum: to_i64(stats.level_sizes.iter().sum::<u64>()),
            level_compaction_durations_nanos: stats
                .level_durations
                .iter()
                .map(|d| to_i64(d.as_nanos()))
                .collect(),
            level_read_sum: to_i64(stats.level_read.iter().sum::<u64>()),
            level_write_sum: to_i64(stats.level_write.iter().sum::<u64>()),
            write_delay_count: to_i64(stats.write_delay_count),
            write_delay_duration_nanos: to_i64(stats.write_delay_duration.as_nanos()),
            write_paused: stats.write_paused,
            io_read_bytes: to_i64(stats.io_read),
            io_write_bytes: to_i64(stats.io_write),
            mem_compaction_count: to_i64(stats.mem_comp),
            level0_compaction_count: to_i64(stats.level0_comp),
            non_level0_compaction_count: to_i64(stats.non_level0_comp),
            seek_compaction_count: to_i64(stats.seek_comp),
            level_table_counts: stats
                .level_tables_counts
                .iter()
                .map(|n| to_i64(*n))
                .collect(),
        }
    }
}

impl StatsSource for Db {
    fn stats_snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        self.stats()
            .map(|stats| StatsSnapshot::from(&stats))
            .map_err(StoreError::Stats)
    }
}

/// A named, metered database handle
pub struct StorageEngine {
    name: String,
    db: Arc<Db>,
    metering: CancellationToken,
}

impl StorageEngine {
    /// Open with gauges going to the global `metrics` recorder
    pub fn open(
        path: impl AsRef<Path>,
        name: &str,
        options: &EngineOptions,
    ) -> Result<Self, StoreError> {
        Self::open_with_sink(path, name, options, Arc::new(RecorderSink))
    }

    pub fn open_with_sink(
        path: impl AsRef<Path>,
        name: &str,
        options: &EngineOptions,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Db::open(path, options.to_options()).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Arc::new(db);

        info!(
            engine = name,
            path = %path.display(),
            open_files = ?options.open_files_cache_capacity,
            block_cache = ?options.block_cache_capacity_bytes,
            write_buffer = ?options.write_buffer_bytes,
            "storage engine opened"
        );

        let metering = CancellationToken::new();
        let source: Arc<dyn StatsSource> = db.clone();
        spawn_metering(MeteringLoop::new(name, source, sink, metering.clone()));

        Ok(Self {
            name: name.to_string(),
            db,
            metering,
        })
    }

    /// Resolve tuning from the process environment, then open
    pub fn open_from_env(path: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        let resolver = EngineConfigResolver::new(Arc::new(ProcessLimits));
        let options = resolver.resolve_config(&TuningConfig::from_env())?;
        Self::open(path, name, &options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> PathBuf {
        self.db.path().to_path_buf()
    }

    /// Read a value; absence is `Ok(None)`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        match self.db.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(StoreError::Read(e)),
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.put(key, value).map_err(StoreError::Write)
    }

    pub fn stats_snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        self.db.stats_snapshot()
    }

    /// Stop metering and close the database
    pub fn close(&self) -> Result<(), StoreError> {
        self.metering.cancel();
        self.db.close().map_err(StoreError::Close)?;
        info!(engine = %self.name, "storage engine closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.metering.cancel();
    }
}

/// Run the loop on the current runtime, or on its own thread without one
fn spawn_metering(task: MeteringLoop) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let exit = task.run().await;
                debug!(?exit, "metering stopped");
            });
        }
        Err(_) => {
            let spawned = std::thread::Builder::new()
                .name("chaindb-metering".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_time()
                        .build();
                    match runtime {
                        Ok(runtime) => {
                            let exit = runtime.block_on(task.run());
                            debug!(?exit, "metering stopped");
                        }
                        Err(e) => error!(error = %e, "failed to start metering runtime"),
                    }
                });
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn metering thread");
            }
        }
    }
}
