//! The public filter type: sizing, the cuckoo eviction chain, and the one-slot victim cache that
//! lets `add` keep working right up to the point the filter is actually full.

use rand::Rng;

use crate::bucket::{BitsPerTag, TAGS_PER_BUCKET};
use crate::error::CuckooError;
use crate::hasher::{alt_index, generate_index_tag_hash, FilterHasher};
use crate::table::{InsertOutcome, Table};

/// Number of displacements attempted before an insert gives up and parks in the victim cache.
const MAX_CUCKOO_COUNT: u32 = 500;

/// Target load factor buckets are sized against; past this, construction logs a warning since
/// the filter is increasingly likely to exhaust its eviction budget under load.
const TARGET_LOAD_FACTOR: f64 = 0.96;

const MIN_BUCKETS: usize = 8192;

/// The single item an eviction chain couldn't place within [`MAX_CUCKOO_COUNT`] hops. Holding its
/// own key (rather than re-deriving it from whatever the next `add`/`delete` call happens to pass)
/// is a deliberate deviation from the reference: see `DESIGN.md`.
struct Victim<K> {
    index: usize,
    tag: u32,
    key: K,
}

/// An adaptive-fingerprint cuckoo filter: approximate set membership in a fixed amount of memory,
/// with a false-positive rate that degrades gracefully as buckets fill by storing fewer, longer
/// fingerprints when a bucket is sparse and more, shorter ones when it's crowded.
///
/// ```
/// use flexfilter::CuckooFilter;
///
/// let mut filter = CuckooFilter::new(1_000);
/// filter.add(42u64).unwrap();
/// assert!(filter.contains(42u64).is_ok());
/// assert!(filter.contains(43u64).is_err());
/// filter.delete(42u64).unwrap();
/// assert!(filter.contains(42u64).is_err());
/// ```
pub struct CuckooFilter<K> {
    table: Table<K>,
    hasher: FilterHasher,
    num_items: usize,
    victim: Option<Victim<K>>,
}

impl<K: Copy + std::hash::Hash> CuckooFilter<K> {
    /// Builds a filter sized to hold roughly `max_num_keys` keys, using 12-bit short fingerprints.
    pub fn new(max_num_keys: usize) -> Self {
        Self::with_bits_per_tag(max_num_keys, BitsPerTag::Twelve)
    }

    /// Builds a filter sized to hold roughly `max_num_keys` keys, with an explicit short
    /// fingerprint width. Wider tags lower the false-positive rate at the cost of more bytes per
    /// bucket; see `SPEC_FULL.md` §3 for the tradeoff this crate's adaptive encoding is built around.
    pub fn with_bits_per_tag(max_num_keys: usize, bits_per_tag: BitsPerTag) -> Self {
        let assoc = TAGS_PER_BUCKET as f64;
        let ideal = (max_num_keys as f64 / assoc / TARGET_LOAD_FACTOR).ceil() as usize;
        let num_buckets = ideal.max(MIN_BUCKETS).next_power_of_two();

        let load = max_num_keys as f64 / (num_buckets as f64 * assoc);
        if load > TARGET_LOAD_FACTOR {
            tracing::warn!(
                max_num_keys,
                num_buckets,
                load,
                "filter may run out of eviction budget before holding every key"
            );
        }

        Self {
            table: Table::new(num_buckets, bits_per_tag),
            hasher: FilterHasher::new(rand::thread_rng().gen()),
            num_items: 0,
            victim: None,
        }
    }

    fn hash_key(&self, key: &K) -> (usize, u32) {
        generate_index_tag_hash(&self.hasher, key, self.table.num_buckets(), self.table.bits_per_tag())
    }

    fn alt_index(&self, index: usize, tag: u32) -> usize {
        alt_index(index, tag, self.table.num_buckets())
    }

    /// Inserts `key`. Fails with [`CuckooError::NotEnoughSpace`] only once the victim cache is
    /// already occupied by an earlier insert that couldn't be placed — at that point the filter
    /// must shed an item (via `delete`) before it can accept another.
    pub fn add(&mut self, key: K) -> Result<(), CuckooError> {
        if self.victim.is_some() {
            tracing::warn!("add called while the victim cache is occupied");
            return Err(CuckooError::NotEnoughSpace);
        }
        let (i, tag) = self.hash_key(&key);
        self.add_impl(i, tag, key);
        Ok(())
    }

    /// Runs the cuckoo eviction chain starting from `(i, tag, key)`. Always terminates: either a
    /// slot is found within `MAX_CUCKOO_COUNT` hops, or the displaced item is parked as the victim.
    fn add_impl(&mut self, i: usize, tag: u32, key: K) {
        let mut cur_index = i;
        let mut cur_tag = tag;
        let mut cur_key = key;

        for count in 0..MAX_CUCKOO_COUNT {
            let kickout = count > 0;
            match self.table.insert_tag_to_bucket(cur_index, cur_tag, kickout, cur_key) {
                InsertOutcome::Placed => {
                    self.num_items += 1;
                    return;
                }
                InsertOutcome::Evicted(displaced_key) => {
                    tracing::trace!(hop = count, "displaced an existing member, continuing chain");
                    cur_key = displaced_key;
                    let (_, new_tag) = self.hash_key(&cur_key);
                    cur_tag = new_tag;
                }
                InsertOutcome::Full => {}
            }
            cur_index = self.alt_index(cur_index, cur_tag);
        }

        tracing::warn!(
            index = cur_index,
            "eviction chain exhausted after {} hops, parking in the victim cache",
            MAX_CUCKOO_COUNT
        );
        self.victim = Some(Victim {
            index: cur_index,
            tag: cur_tag,
            key: cur_key,
        });
    }

    /// Tests whether `key` was previously added and not since deleted. Like the rest of this
    /// crate's public surface, a negative answer can itself be a false positive.
    pub fn contains(&self, key: K) -> Result<(), CuckooError> {
        let (i1, tag) = self.hash_key(&key);
        let i2 = self.alt_index(i1, tag);

        let victim_hit = self
            .victim
            .as_ref()
            .is_some_and(|v| v.tag == tag && (i1 == v.index || i2 == v.index));

        if victim_hit || self.table.find_tag_in_buckets(i1, i2, tag) {
            Ok(())
        } else {
            Err(CuckooError::NotFound)
        }
    }

    /// Repairs a false positive: if `key` produced a `contains` hit it shouldn't have, this
    /// rehashes the two members whose fingerprints happened to alias and gives them fresh ones,
    /// so the same false positive won't recur. Does not change which keys the filter reports as
    /// present for any OTHER query — only the colliding pair's physical fingerprints move.
    pub fn change_fingerprint(&mut self, key: K) -> Result<(), CuckooError> {
        let (i1, tag) = self.hash_key(&key);
        let i2 = self.alt_index(i1, tag);

        if self.table.find_wrong_tag_in_buckets(&self.hasher, i1, i2, tag) {
            Ok(())
        } else {
            Err(CuckooError::NotFound)
        }
    }

    /// Removes `key`. If a victim was waiting for room, this is where it gets retried.
    pub fn delete(&mut self, key: K) -> Result<(), CuckooError> {
        let (i1, tag) = self.hash_key(&key);
        let i2 = self.alt_index(i1, tag);

        let deleted = self.table.delete_tag_from_bucket(&self.hasher, i1, tag)
            || self.table.delete_tag_from_bucket(&self.hasher, i2, tag);

        if deleted {
            self.num_items -= 1;
            self.try_eliminate_victim();
            Ok(())
        } else if self
            .victim
            .as_ref()
            .is_some_and(|v| v.tag == tag && (i1 == v.index || i2 == v.index))
        {
            self.victim = None;
            Ok(())
        } else {
            Err(CuckooError::NotFound)
        }
    }

    /// After a deletion frees a slot, retry the parked victim — if it still doesn't fit, it's
    /// re-parked by `add_impl` exactly as before.
    fn try_eliminate_victim(&mut self) {
        if let Some(victim) = self.victim.take() {
            self.add_impl(victim.index, victim.tag, victim.key);
        }
    }

    /// Number of keys currently stored (the victim cache, if occupied, counts as one more).
    pub fn len(&self) -> usize {
        self.num_items + if self.victim.is_some() { 1 } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of the backing table, in bytes. Does not include the shadow table, which this
    /// crate carries as an implementation detail the reference's byte-budget reasoning predates.
    pub fn size_in_bytes(&self) -> usize {
        self.table.size_in_bytes()
    }

    /// A human-readable summary, in the spirit of the reference's own `Info()`.
    pub fn info(&self) -> String {
        let capacity = self.table.num_buckets() * TAGS_PER_BUCKET;
        let load_factor = self.num_items as f64 / capacity as f64;
        let bits_per_key = if self.num_items > 0 {
            format!("{:.2}", 8.0 * self.table.size_in_bytes() as f64 / self.num_items as f64)
        } else {
            "N/A".to_string()
        };
        format!(
            "CuckooFilter: {} buckets, {}-bit tags, {} keys stored, load factor {:.4}, {} KB, {} bits/key",
            self.table.num_buckets(),
            self.table.bits_per_tag().width(),
            self.num_items,
            load_factor,
            self.table.size_in_bytes() >> 10,
            bits_per_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_contains_delete_round_trip() {
        let mut filter = CuckooFilter::new(1000);
        assert!(filter.contains(5u64).is_err());
        filter.add(5u64).unwrap();
        assert!(filter.contains(5u64).is_ok());
        filter.delete(5u64).unwrap();
        assert!(filter.contains(5u64).is_err());
        assert!(filter.delete(5u64).is_err());
    }

    #[test]
    fn len_tracks_successful_inserts_and_deletes() {
        let mut filter = CuckooFilter::new(1000);
        for k in 0..100u64 {
            filter.add(k).unwrap();
        }
        assert_eq!(filter.len(), 100);
        for k in 0..50u64 {
            filter.delete(k).unwrap();
        }
        assert_eq!(filter.len(), 50);
    }

    #[test]
    fn deleting_reverse_insertion_order_empties_the_filter() {
        let mut filter = CuckooFilter::new(200);
        let keys: Vec<u64> = (0..150).collect();
        for &k in &keys {
            filter.add(k).unwrap();
        }
        for &k in keys.iter().rev() {
            filter.delete(k).unwrap();
        }
        assert!(filter.is_empty());
        for &k in &keys {
            assert!(filter.contains(k).is_err());
        }
    }

    #[test]
    fn change_fingerprint_on_a_key_never_inserted_reports_not_found() {
        let mut filter: CuckooFilter<u64> = CuckooFilter::new(1000);
        filter.add(1u64).unwrap();
        // Overwhelmingly likely with 12-bit tags that a random, never-inserted key isn't a false
        // positive; if it is, there's nothing to repair and NotFound is still the right answer.
        let probe = 0xDEAD_BEEFu64;
        if filter.contains(probe).is_err() {
            assert!(filter.change_fingerprint(probe).is_err());
        }
    }

    #[test]
    fn filling_past_total_capacity_eventually_reports_not_enough_space() {
        // Requesting a small max_num_keys still gets the reference's fixed minimum bucket count,
        // so total slot capacity is a known quantity derived from the table's own byte size.
        let bits_per_tag = BitsPerTag::Twelve;
        let mut filter = CuckooFilter::with_bits_per_tag(8, bits_per_tag);
        let num_buckets = filter.size_in_bytes() / bits_per_tag.bucket_len_bytes();
        let capacity = (num_buckets * TAGS_PER_BUCKET) as u64;

        let mut hit_capacity = false;
        for k in 0..(capacity + 2000) {
            if let Err(CuckooError::NotEnoughSpace) = filter.add(k) {
                hit_capacity = true;
                break;
            }
        }
        assert!(
            hit_capacity,
            "inserting more unique keys than total slots must exhaust capacity"
        );
    }

    #[test]
    fn info_reports_something_readable() {
        let mut filter = CuckooFilter::new(100);
        filter.add(1u64).unwrap();
        let info = filter.info();
        assert!(info.contains("keys stored"));
    }
}
