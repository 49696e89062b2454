//! Table layout of the tree
//!
//! A [`Version`] is an immutable view of which tables live on which level.
//! Readers clone the current `Arc<Version>`; compaction builds the next
//! version by applying a [`VersionEdit`] and swaps it in.

use bytes::Bytes;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Seeks allowed per byte of table before a seek compaction is due
const BYTES_PER_SEEK: u64 = 16 * 1024;

/// Lower bound on allowed seeks for small tables
const MIN_ALLOWED_SEEKS: i64 = 100;

/// Metadata of one table in the tree
#[derive(Debug)]
pub struct TableMeta {
    pub number: u64,
    pub file_size: u64,
    pub entry_count: u64,
    pub smallest: Bytes,
    pub largest: Bytes,
    allowed_seeks: AtomicI64,
}

impl TableMeta {
    pub fn new(number: u64, file_size: u64, entry_count: u64, smallest: Bytes, largest: Bytes) -> Self {
        let allowed = ((file_size / BYTES_PER_SEEK) as i64).max(MIN_ALLOWED_SEEKS);
        Self {
            number,
            file_size,
            entry_count,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed),
        }
    }

    /// Check if the key falls inside this table's range
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.smallest.as_ref() && key <= self.largest.as_ref()
    }

    /// Check if this table overlaps the inclusive range
    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.largest.as_ref() >= smallest && self.smallest.as_ref() <= largest
    }

    /// Charge one wasted seek; true exactly once, when the budget runs out
    pub fn charge_seek(&self) -> bool {
        self.allowed_seeks.fetch_sub(1, Ordering::Relaxed) == 1
    }
}

/// Changes between two versions
#[derive(Debug, Default)]
pub struct VersionEdit {
    pub added: Vec<(usize, Arc<TableMeta>)>,
    pub deleted: Vec<(usize, u64)>,
    pub compact_pointer: Option<(usize, Bytes)>,
}

impl VersionEdit {
    pub fn add_table(&mut self, level: usize, table: Arc<TableMeta>) {
        self.added.push((level, table));
    }

    pub fn delete_table(&mut self, level: usize, number: u64) {
        self.deleted.push((level, number));
    }
}

/// Immutable table layout
#[derive(Debug, Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<TableMeta>>>,
    /// Largest key of the last size compaction per level, for round-robin picking
    compact_pointers: Vec<Option<Bytes>>,
}

impl Version {
    /// Empty tree with `max_levels` levels
    pub fn new(max_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); max_levels],
            compact_pointers: vec![None; max_levels],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Tables of a level; level 0 ordered oldest first, deeper levels by key
    pub fn tables(&self, level: usize) -> &[Arc<TableMeta>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn table_count(&self, level: usize) -> usize {
        self.tables(level).len()
    }

    /// Total bytes of a level
    pub fn level_size(&self, level: usize) -> u64 {
        self.tables(level).iter().map(|t| t.file_size).sum()
    }

    /// Deepest level holding any table, 0 for an empty tree
    pub fn deepest_non_empty(&self) -> usize {
        self.levels.iter().rposition(|l| !l.is_empty()).unwrap_or(0)
    }

    pub fn compact_pointer(&self, level: usize) -> Option<&Bytes> {
        self.compact_pointers.get(level).and_then(Option::as_ref)
    }

    /// Every table on every level
    pub fn all_tables(&self) -> impl Iterator<Item = (usize, &Arc<TableMeta>)> {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, tables)| tables.iter().map(move |t| (level, t)))
    }

    /// Tables of a level overlapping the inclusive key range
    pub fn overlapping(&self, level: usize, smallest: &[u8], largest: &[u8]) -> Vec<Arc<TableMeta>> {
        self.tables(level)
            .iter()
            .filter(|t| t.overlaps(smallest, largest))
            .cloned()
            .collect()
    }

    /// Check if any level below `level` overlaps the range
    pub fn overlaps_below(&self, level: usize, smallest: &[u8], largest: &[u8]) -> bool {
        (level + 1..self.levels.len())
            .any(|l| self.tables(l).iter().any(|t| t.overlaps(smallest, largest)))
    }

    /// Tables that may hold `key`, in the order a read must consult them
    ///
    /// Level 0 newest first, then at most one table per deeper level.
    pub fn candidates(&self, key: &[u8]) -> Vec<(usize, Arc<TableMeta>)> {
        let mut out: Vec<(usize, Arc<TableMeta>)> = self
            .tables(0)
            .iter()
            .rev()
            .filter(|t| t.contains(key))
            .map(|t| (0, Arc::clone(t)))
            .collect();

        for level in 1..self.levels.len() {
            let tables = self.tables(level);
            let idx = tables.partition_point(|t| t.largest.as_ref() < key);
            if let Some(table) = tables.get(idx) {
                if table.contains(key) {
                    out.push((level, Arc::clone(table)));
                }
            }
        }

        out
    }

    /// Build the next version
    pub fn apply(&self, edit: &VersionEdit) -> Version {
        let mut next = self.clone();

        for (level, number) in &edit.deleted {
            if let Some(tables) = next.levels.get_mut(*level) {
                tables.retain(|t| t.number != *number);
            }
        }
        for (level, table) in &edit.added {
            if let Some(tables) = next.levels.get_mut(*level) {
                tables.push(Arc::clone(table));
            }
        }
        for (level, tables) in next.levels.iter_mut().enumerate() {
            if level == 0 {
                tables.sort_by_key(|t| t.number);
            } else {
                tables.sort_by(|a, b| a.smallest.cmp(&b.smallest));
            }
        }
        if let Some((level, key)) = &edit.compact_pointer {
            if let Some(slot) = next.compact_pointers.get_mut(*level) {
                *slot = Some(key.clone());
            }
        }

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(number: u64, smallest: &'static str, largest: &'static str) -> Arc<TableMeta> {
        Arc::new(TableMeta::new(
            number,
            1024,
            10,
            Bytes::from(smallest),
            Bytes::from(largest),
        ))
    }

    #[test]
    fn test_candidates_order() {
        let mut edit = VersionEdit::default();
        edit.add_table(0, table(5, "a", "m"));
        edit.add_table(0, table(9, "k", "z"));
        edit.add_table(1, table(3, "a", "f"));
        edit.add_table(1, table(4, "g", "p"));
        edit.add_table(2, table(1, "a", "z"));

        let version = Version::new(7).apply(&edit);
        let numbers: Vec<u64> = version
            .candidates(b"l")
            .into_iter()
            .map(|(_, t)| t.number)
            .collect();
        assert_eq!(numbers, vec![9, 5, 4, 1]);

        let numbers: Vec<u64> = version
            .candidates(b"fz")
            .into_iter()
            .map(|(_, t)| t.number)
            .collect();
        assert_eq!(numbers, vec![5, 1]);
    }

    #[test]
    fn test_apply_deletes_and_sizes() {
        let mut edit = VersionEdit::default();
        edit.add_table(0, table(1, "a", "b"));
        edit.add_table(0, table(2, "c", "d"));
        let version = Version::new(7).apply(&edit);
        assert_eq!(version.table_count(0), 2);
        assert_eq!(version.level_size(0), 2048);
        assert_eq!(version.deepest_non_empty(), 0);

        let mut edit = VersionEdit::default();
        edit.delete_table(0, 1);
        edit.delete_table(0, 2);
        edit.add_table(3, table(3, "a", "d"));
        let version = version.apply(&edit);
        assert_eq!(version.table_count(0), 0);
        assert_eq!(version.deepest_non_empty(), 3);
        assert!(version.overlaps_below(1, b"b", b"c"));
        assert!(!version.overlaps_below(3, b"b", b"c"));
    }

    #[test]
    fn test_seek_budget() {
        let meta = TableMeta::new(1, 0, 0, Bytes::new(), Bytes::new());
        for _ in 0..MIN_ALLOWED_SEEKS - 1 {
            assert!(!meta.charge_seek());
        }
        assert!(meta.charge_seek());
        assert!(!meta.charge_seek());
    }
}
