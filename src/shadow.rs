//! The shadow table: a plain array of the original keys backing each primary-table slot.
//!
//! Used only to recompute correct fingerprints when a bucket's encoding changes state (insertion,
//! deletion) or when [`change_fingerprint`](crate::CuckooFilter::change_fingerprint) repairs an
//! aliased short tag. Carries no occupancy logic of its own — `table.rs` is responsible for
//! keeping it in lock-step with the primary table's slot occupancy.

use crate::bucket::TAGS_PER_BUCKET;

#[derive(Debug, Clone)]
pub struct ShadowTable<K> {
    cells: Vec<Option<K>>,
    num_buckets: usize,
}

impl<K: Copy> ShadowTable<K> {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            cells: vec![None; num_buckets * TAGS_PER_BUCKET],
            num_buckets,
        }
    }

    fn cell_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.num_buckets);
        debug_assert!(j < TAGS_PER_BUCKET);
        i * TAGS_PER_BUCKET + j
    }

    /// Returns the key stored at logical slot `(i, j)`, or `None` if empty.
    pub fn read(&self, i: usize, j: usize) -> Option<K> {
        self.cells[self.cell_index(i, j)]
    }

    /// Overwrites the key stored at logical slot `(i, j)` unconditionally.
    pub fn write(&mut self, i: usize, j: usize, key: Option<K>) {
        let idx = self.cell_index(i, j);
        self.cells[idx] = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let table: ShadowTable<u64> = ShadowTable::new(4);
        for i in 0..4 {
            for j in 0..TAGS_PER_BUCKET {
                assert_eq!(table.read(i, j), None);
            }
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut table: ShadowTable<u64> = ShadowTable::new(4);
        table.write(2, 3, Some(42));
        assert_eq!(table.read(2, 3), Some(42));
        assert_eq!(table.read(2, 2), None);

        table.write(2, 3, None);
        assert_eq!(table.read(2, 3), None);
    }
}
