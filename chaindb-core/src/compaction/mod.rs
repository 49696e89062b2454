//! Background compaction for the LSM tree
//!
//! Picking is pure: given the current [`Version`] it decides which tables to
//! merge. Execution reads the inputs, merges them newest-wins, and writes
//! output tables of bounded size one level down.

use crate::sstable::{table_path, BuiltTable, SSTableBuilder, TableCache};
use crate::storage::{CompactionCount, Options, TableMeta, Version, VersionEdit};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Why a compaction was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Too many level-0 tables
    Level0,
    /// A level outgrew its size budget
    Size,
    /// A table wasted too many seeks
    Seek,
}

impl From<CompactionKind> for CompactionCount {
    fn from(kind: CompactionKind) -> Self {
        match kind {
            CompactionKind::Level0 => CompactionCount::Level0,
            CompactionKind::Size => CompactionCount::NonLevel0,
            CompactionKind::Seek => CompactionCount::Seek,
        }
    }
}

/// Tables selected for one compaction
#[derive(Debug)]
pub struct CompactionTask {
    pub kind: CompactionKind,
    /// Source level
    pub level: usize,
    /// Tables taken from the source level
    pub inputs: Vec<Arc<TableMeta>>,
    /// Overlapping tables of the output level
    pub next_inputs: Vec<Arc<TableMeta>>,
}

impl CompactionTask {
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// Inclusive key range covered by the source tables
    fn input_range(inputs: &[Arc<TableMeta>]) -> Option<(Bytes, Bytes)> {
        let smallest = inputs.iter().map(|t| &t.smallest).min()?.clone();
        let largest = inputs.iter().map(|t| &t.largest).max()?.clone();
        Some((smallest, largest))
    }

    fn all_inputs(&self) -> impl Iterator<Item = (usize, &Arc<TableMeta>)> {
        self.inputs
            .iter()
            .map(move |t| (self.level, t))
            .chain(self.next_inputs.iter().map(move |t| (self.level + 1, t)))
    }
}

/// Outcome of a finished compaction
#[derive(Debug)]
pub struct CompactionOutput {
    pub edit: VersionEdit,
    pub outputs: Vec<BuiltTable>,
    /// Bytes read, by input level
    pub bytes_read: Vec<(usize, u64)>,
    pub bytes_written: u64,
}

/// Decide what to compact next, if anything
///
/// Level 0 goes first, then the level most over its size budget, then a
/// table whose seek budget ran out.
pub fn pick(
    version: &Version,
    options: &Options,
    seek_candidate: Option<(usize, Arc<TableMeta>)>,
) -> Option<CompactionTask> {
    let last = version.num_levels().saturating_sub(1);

    if version.table_count(0) >= options.l0_compaction_trigger {
        return Some(level0_task(version, CompactionKind::Level0));
    }

    let mut best: Option<(usize, f64)> = None;
    for level in 1..last {
        let score = version.level_size(level) as f64 / options.max_bytes_for_level(level) as f64;
        if score >= 1.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((level, score));
        }
    }
    if let Some((level, _)) = best {
        return Some(size_task(version, level));
    }

    if options.disable_seek_compaction {
        return None;
    }
    let (level, table) = seek_candidate?;
    if level >= last || !version.tables(level).iter().any(|t| t.number == table.number) {
        return None;
    }
    if level == 0 {
        return Some(level0_task(version, CompactionKind::Seek));
    }
    Some(with_next_inputs(version, CompactionKind::Seek, level, vec![table]))
}

/// All of level 0 goes down at once; newer level-0 tables may shadow
/// older ones, so moving only some of them would break read order
fn level0_task(version: &Version, kind: CompactionKind) -> CompactionTask {
    with_next_inputs(version, kind, 0, version.tables(0).to_vec())
}

/// Round-robin through the level, starting after the last compacted key
fn size_task(version: &Version, level: usize) -> CompactionTask {
    let tables = version.tables(level);
    let table = version
        .compact_pointer(level)
        .and_then(|pointer| tables.iter().find(|t| t.largest > *pointer))
        .or_else(|| tables.first())
        .cloned();

    with_next_inputs(version, CompactionKind::Size, level, table.into_iter().collect())
}

fn with_next_inputs(
    version: &Version,
    kind: CompactionKind,
    level: usize,
    inputs: Vec<Arc<TableMeta>>,
) -> CompactionTask {
    let next_inputs = match CompactionTask::input_range(&inputs) {
        Some((smallest, largest)) => version.overlapping(level + 1, &smallest, &largest),
        None => Vec::new(),
    };

    CompactionTask {
        kind,
        level,
        inputs,
        next_inputs,
    }
}

/// Merge the task's inputs into new tables on the output level
pub fn execute(
    task: &CompactionTask,
    version: &Version,
    options: &Options,
    dir: &Path,
    table_cache: &TableCache,
    next_file_number: &AtomicU64,
) -> Result<CompactionOutput> {
    info!(
        kind = ?task.kind,
        level = task.level,
        inputs = task.inputs.len(),
        next_inputs = task.next_inputs.len(),
        "Compacting"
    );

    // Oldest data first so newer entries overwrite it: the output level,
    // then the source level in file number order
    let mut sources: Vec<(usize, &Arc<TableMeta>)> = task
        .next_inputs
        .iter()
        .map(|t| (task.output_level(), t))
        .collect();
    let mut inputs: Vec<&Arc<TableMeta>> = task.inputs.iter().collect();
    inputs.sort_by_key(|t| t.number);
    sources.extend(inputs.into_iter().map(|t| (task.level, t)));

    let mut merged: BTreeMap<Bytes, Option<Bytes>> = BTreeMap::new();
    let mut bytes_read: BTreeMap<usize, u64> = BTreeMap::new();
    for (level, meta) in sources {
        let reader = table_cache.get(meta.number)?;
        merged.extend(reader.entries()?);
        *bytes_read.entry(level).or_default() += meta.file_size;
    }

    // Tombstones can go once nothing deeper could still hold the key
    let drop_tombstones = match (merged.keys().next(), merged.keys().next_back()) {
        (Some(smallest), Some(largest)) => {
            !version.overlaps_below(task.output_level(), smallest, largest)
        }
        _ => true,
    };

    let outputs = write_tables(
        merged,
        drop_tombstones,
        options,
        options.table_size,
        dir,
        next_file_number,
    )?;

    let mut edit = VersionEdit::default();
    for (level, meta) in task.all_inputs() {
        edit.delete_table(level, meta.number);
    }
    for built in &outputs {
        edit.add_table(task.output_level(), Arc::new(table_meta(built)));
    }
    if task.kind == CompactionKind::Size {
        if let Some((_, largest)) = CompactionTask::input_range(&task.inputs) {
            edit.compact_pointer = Some((task.level, largest));
        }
    }

    let bytes_written = outputs.iter().map(|t| t.file_size).sum();

    Ok(CompactionOutput {
        edit,
        outputs,
        bytes_read: bytes_read.into_iter().collect(),
        bytes_written,
    })
}

/// Metadata for a freshly written table
pub fn table_meta(built: &BuiltTable) -> TableMeta {
    TableMeta::new(
        built.number,
        built.file_size,
        built.entry_count,
        built.smallest.clone(),
        built.largest.clone(),
    )
}

/// Write sorted entries into tables of roughly `table_size` bytes
///
/// On error every table written so far is removed again.
pub fn write_tables(
    entries: impl IntoIterator<Item = (Bytes, Option<Bytes>)>,
    drop_tombstones: bool,
    options: &Options,
    table_size: u64,
    dir: &Path,
    next_file_number: &AtomicU64,
) -> Result<Vec<BuiltTable>> {
    let mut outputs: Vec<BuiltTable> = Vec::new();
    let mut builder: Option<SSTableBuilder> = None;

    let result = (|| -> Result<()> {
        for (key, value) in entries {
            if value.is_none() && drop_tombstones {
                continue;
            }

            if builder.is_none() {
                let number = next_file_number.fetch_add(1, Ordering::SeqCst);
                builder = Some(SSTableBuilder::new(
                    table_path(dir, number),
                    number,
                    options.sstable_config(),
                )?);
            }
            let Some(current) = builder.as_mut() else {
                continue;
            };
            current.add(&key, value.as_deref())?;

            if current.estimated_size() >= table_size {
                if let Some(full) = builder.take() {
                    outputs.push(full.finish()?);
                }
            }
        }

        if let Some(last) = builder.take() {
            outputs.push(last.finish()?);
        }
        Ok(())
    })();

    if let Err(e) = result {
        if let Some(partial) = builder.take() {
            partial.abandon();
        }
        for built in &outputs {
            if let Err(remove_err) = std::fs::remove_file(&built.path) {
                warn!(path = %built.path.display(), error = %remove_err, "failed to remove compaction output");
            }
        }
        return Err(match e {
            err @ (Error::Io(_) | Error::Compaction(_)) => err,
            other => Error::Compaction(other.to_string()),
        });
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::BlockCache;
    use crate::storage::IoCounters;
    use tempfile::TempDir;

    fn meta(number: u64, smallest: &'static str, largest: &'static str, size: u64) -> Arc<TableMeta> {
        Arc::new(TableMeta::new(number, size, 1, Bytes::from(smallest), Bytes::from(largest)))
    }

    fn version_with(tables: Vec<(usize, Arc<TableMeta>)>) -> Version {
        let mut edit = VersionEdit::default();
        for (level, table) in tables {
            edit.add_table(level, table);
        }
        Version::new(7).apply(&edit)
    }

    #[test]
    fn test_pick_level0_takes_all_tables() {
        let options = Options::default();
        let version = version_with(vec![
            (0, meta(1, "a", "c", 10)),
            (0, meta(2, "b", "d", 10)),
            (0, meta(3, "x", "z", 10)),
            (0, meta(4, "e", "f", 10)),
            (1, meta(5, "c", "e", 10)),
            (1, meta(6, "g", "h", 10)),
        ]);

        let task = pick(&version, &options, None).unwrap();
        assert_eq!(task.kind, CompactionKind::Level0);
        assert_eq!(task.inputs.len(), 4);
        let next: Vec<u64> = task.next_inputs.iter().map(|t| t.number).collect();
        assert_eq!(next, vec![5, 6]);
    }

    #[test]
    fn test_pick_size_round_robin() {
        let options = Options {
            base_level_size: 15,
            ..Default::default()
        };
        let version = version_with(vec![
            (1, meta(1, "a", "c", 10)),
            (1, meta(2, "d", "f", 10)),
            (2, meta(3, "e", "g", 10)),
        ]);

        let task = pick(&version, &options, None).unwrap();
        assert_eq!(task.kind, CompactionKind::Size);
        assert_eq!(task.inputs[0].number, 1);
        assert!(task.next_inputs.is_empty());

        let mut edit = VersionEdit::default();
        edit.compact_pointer = Some((1, Bytes::from("c")));
        let version = version.apply(&edit);
        let task = pick(&version, &options, None).unwrap();
        assert_eq!(task.inputs[0].number, 2);
        assert_eq!(task.next_inputs[0].number, 3);
    }

    #[test]
    fn test_pick_seek_respects_disable_flag() {
        let table = meta(1, "a", "c", 10);
        let version = version_with(vec![(1, Arc::clone(&table))]);

        let enabled = Options::default();
        let task = pick(&version, &enabled, Some((1, Arc::clone(&table)))).unwrap();
        assert_eq!(task.kind, CompactionKind::Seek);

        let disabled = Options {
            disable_seek_compaction: true,
            ..Default::default()
        };
        assert!(pick(&version, &disabled, Some((1, table))).is_none());
    }

    #[test]
    fn test_execute_newest_wins_and_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let next = AtomicU64::new(1);

        let older = write_tables(
            vec![
                (Bytes::from("a"), Some(Bytes::from("old"))),
                (Bytes::from("b"), Some(Bytes::from("keep"))),
            ],
            false,
            &options,
            options.table_size,
            dir.path(),
            &next,
        )
        .unwrap();
        let newer = write_tables(
            vec![
                (Bytes::from("a"), Some(Bytes::from("new"))),
                (Bytes::from("b"), None),
            ],
            false,
            &options,
            options.table_size,
            dir.path(),
            &next,
        )
        .unwrap();

        let version = version_with(vec![
            (0, Arc::new(table_meta(&older[0]))),
            (0, Arc::new(table_meta(&newer[0]))),
        ]);
        let task = level0_task(&version, CompactionKind::Level0);

        let io = Arc::new(IoCounters::default());
        let cache = TableCache::new(dir.path().to_path_buf(), 10, Arc::new(BlockCache::new(1 << 20)), io);
        let output = execute(&task, &version, &options, dir.path(), &cache, &next).unwrap();

        assert_eq!(output.outputs.len(), 1);
        assert_eq!(output.edit.deleted.len(), 2);
        assert_eq!(output.bytes_read.len(), 1);
        assert!(output.bytes_written > 0);

        let reader = cache.get(output.outputs[0].number).unwrap();
        let entries = reader.entries().unwrap();
        assert_eq!(entries, vec![(Bytes::from("a"), Some(Bytes::from("new")))]);
    }

    #[test]
    fn test_write_tables_splits_outputs() {
        let dir = TempDir::new().unwrap();
        let options = Options::default();
        let next = AtomicU64::new(10);

        let entries = (0..2000u32).map(|i| {
            (
                Bytes::from(format!("key-{:05}", i)),
                Some(Bytes::from(vec![b'v'; 32])),
            )
        });
        let outputs = write_tables(entries, true, &options, 4096, dir.path(), &next).unwrap();

        assert!(outputs.len() > 1);
        assert!(outputs.windows(2).all(|w| w[0].largest < w[1].smallest));
        assert_eq!(outputs.iter().map(|t| t.entry_count).sum::<u64>(), 2000);
    }
}
