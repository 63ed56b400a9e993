//! The primary table: a flat byte buffer of adaptive buckets plus the shadow table of keys behind
//! them. Every operation that needs to keep the two in lock-step — insertion, deletion, and the
//! change-fingerprint repair — lives here. `bucket.rs` only knows how to read and write one
//! bucket's bytes; this module is the one place that decides which bucket and which slot.

use rand::Rng;

use crate::bucket::{self, BitsPerTag, BucketState};
use crate::hasher::{generate_index_tag_hash, FilterHasher};
use crate::shadow::ShadowTable;

/// The result of attempting to place a tag into one of a key's two candidate buckets.
pub enum InsertOutcome<K> {
    /// The tag was placed into a free slot.
    Placed,
    /// The bucket was full; kicking out an existing member made room. Carries the evicted key,
    /// which the caller must now re-insert at its alternate bucket.
    Evicted(K),
    /// The bucket was full and the caller didn't ask to evict.
    Full,
}

pub struct Table<K> {
    buf: Vec<u8>,
    bits_per_tag: BitsPerTag,
    num_buckets: usize,
    shadow: ShadowTable<K>,
}

impl<K: Copy> Table<K> {
    pub fn new(num_buckets: usize, bits_per_tag: BitsPerTag) -> Self {
        Self {
            buf: vec![0u8; num_buckets * bits_per_tag.bucket_len_bytes()],
            bits_per_tag,
            num_buckets,
            shadow: ShadowTable::new(num_buckets),
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn bits_per_tag(&self) -> BitsPerTag {
        self.bits_per_tag
    }

    pub fn size_in_bytes(&self) -> usize {
        self.buf.len()
    }

    fn bucket_range(&self, i: usize) -> std::ops::Range<usize> {
        let len = self.bits_per_tag.bucket_len_bytes();
        let start = i * len;
        start..start + len
    }

    fn bucket(&self, i: usize) -> &[u8] {
        &self.buf[self.bucket_range(i)]
    }

    fn bucket_mut(&mut self, i: usize) -> &mut [u8] {
        let range = self.bucket_range(i);
        &mut self.buf[range]
    }

    pub fn read_tag(&self, i: usize, j: usize) -> u32 {
        bucket::read_tag(self.bucket(i), self.bits_per_tag, j)
    }

    fn write_tag(&mut self, i: usize, j: usize, t: u32) {
        bucket::write_tag(self.bucket_mut(i), self.bits_per_tag, j, t)
    }

    fn state(&self, i: usize) -> BucketState {
        BucketState::try_from(self.read_tag(i, 4) as u8).expect("corrupt bucket state byte")
    }

    /// How many members bucket `i` currently holds.
    pub fn occupancy(&self, i: usize) -> usize {
        match self.state(i) {
            BucketState::Empty => 0,
            BucketState::OneLong => 1,
            BucketState::TwoLong => 2,
            BucketState::TwoShortOneLong => 3,
            BucketState::FourShort => 4,
        }
    }

    fn hash_key(&self, hasher: &FilterHasher, key: &K) -> (usize, u32)
    where
        K: std::hash::Hash,
    {
        generate_index_tag_hash(hasher, key, self.num_buckets, self.bits_per_tag)
    }

    fn find_tag_in_bucket(&self, i: usize, tag: u32) -> bool {
        let (tagshort, tagshorthigh) = bucket::split_tag(tag, self.bits_per_tag);
        match self.state(i) {
            BucketState::Empty => false,
            BucketState::OneLong => self.read_tag(i, 0) == tag,
            BucketState::TwoLong => self.read_tag(i, 0) == tag || self.read_tag(i, 2) == tag,
            BucketState::TwoShortOneLong => {
                self.read_tag(i, 0) == tagshort
                    || self.read_tag(i, 1) == tagshorthigh
                    || self.read_tag(i, 2) == tag
            }
            BucketState::FourShort => {
                self.read_tag(i, 0) == tagshort
                    || self.read_tag(i, 1) == tagshorthigh
                    || self.read_tag(i, 2) == tagshort
                    || self.read_tag(i, 3) == tagshorthigh
            }
        }
    }

    /// Whether `tag` is present in either of a key's two candidate buckets.
    pub fn find_tag_in_buckets(&self, i1: usize, i2: usize, tag: u32) -> bool {
        self.find_tag_in_bucket(i1, tag) || self.find_tag_in_bucket(i2, tag)
    }

    /// Rewrites the fingerprints of the two members sharing a short slot that produced a false
    /// positive, so the aliasing that caused it doesn't recur. Returns whether a pair of aliased
    /// slots was found and repaired in either candidate bucket.
    pub fn find_wrong_tag_in_buckets(
        &mut self,
        hasher: &FilterHasher,
        i1: usize,
        i2: usize,
        tag: u32,
    ) -> bool
    where
        K: std::hash::Hash,
    {
        for i in [i1, i2] {
            let (tagshort, tagshorthigh) = bucket::split_tag(tag, self.bits_per_tag);
            let aliased_pair = match self.state(i) {
                BucketState::TwoShortOneLong => {
                    (self.read_tag(i, 0) == tagshort || self.read_tag(i, 1) == tagshorthigh)
                        .then_some((0, 1))
                }
                BucketState::FourShort => {
                    if self.read_tag(i, 0) == tagshort || self.read_tag(i, 1) == tagshorthigh {
                        Some((0, 1))
                    } else if self.read_tag(i, 2) == tagshort || self.read_tag(i, 3) == tagshorthigh
                    {
                        Some((2, 3))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some((j_lo, j_hi)) = aliased_pair {
                self.repair_pair(hasher, i, j_lo, j_hi);
                return true;
            }
        }
        false
    }

    /// Swaps the two members at `(j_lo, j_hi)` between slots, each recomputed from its shadow key —
    /// the actual corrective action: the pair that collided under the old fingerprints gets fresh
    /// ones derived the same way every other fingerprint in the filter is.
    fn repair_pair(&mut self, hasher: &FilterHasher, i: usize, j_lo: usize, j_hi: usize)
    where
        K: std::hash::Hash,
    {
        let key_lo = self.shadow.read(i, j_lo).expect("occupied short slot");
        let (_, tag_lo) = self.hash_key(hasher, &key_lo);
        let (_, high_of_lo) = bucket::split_tag(tag_lo, self.bits_per_tag);
        bucket::overwrite_short(self.bucket_mut(i), self.bits_per_tag, j_hi, high_of_lo);

        let key_hi = self.shadow.read(i, j_hi).expect("occupied short slot");
        let (_, tag_hi) = self.hash_key(hasher, &key_hi);
        let (low_of_hi, _) = bucket::split_tag(tag_hi, self.bits_per_tag);
        bucket::overwrite_short(self.bucket_mut(i), self.bits_per_tag, j_lo, low_of_hi);

        self.shadow.write(i, j_lo, Some(key_hi));
        self.shadow.write(i, j_hi, Some(key_lo));
    }

    /// Removes the member matching `tag` from bucket `i`, disambiguating between short slots that
    /// nominally match by rehashing their shadow keys. Returns whether a member was removed.
    pub fn delete_tag_from_bucket(&mut self, hasher: &FilterHasher, i: usize, tag: u32) -> bool
    where
        K: std::hash::Hash,
    {
        let (tagshort, tagshorthigh) = bucket::split_tag(tag, self.bits_per_tag);
        match self.state(i) {
            BucketState::Empty => false,
            BucketState::OneLong => {
                if self.read_tag(i, 0) == tag {
                    self.write_tag(i, 0, 0);
                    self.shadow.write(i, 0, None);
                    true
                } else {
                    false
                }
            }
            BucketState::TwoLong => {
                if self.read_tag(i, 2) == tag {
                    self.write_tag(i, 2, 0);
                    self.shadow.write(i, 2, None);
                    true
                } else if self.read_tag(i, 0) == tag {
                    let survivor_key = self.shadow.read(i, 2);
                    self.write_tag(i, 0, 0); // moves slot2's long into slot0, state -> OneLong
                    self.shadow.write(i, 0, survivor_key);
                    self.shadow.write(i, 2, None);
                    true
                } else {
                    false
                }
            }
            BucketState::TwoShortOneLong => {
                self.delete_from_two_short_one_long(hasher, i, tag, tagshort, tagshorthigh)
            }
            BucketState::FourShort => {
                self.delete_from_four_short(hasher, i, tag, tagshort, tagshorthigh)
            }
        }
    }

    fn disambiguate(
        &self,
        hasher: &FilterHasher,
        i: usize,
        tag: u32,
        candidates: &[usize],
    ) -> Option<usize>
    where
        K: std::hash::Hash,
    {
        let mut chosen = None;
        for &j in candidates {
            let key = self.shadow.read(i, j).expect("occupied slot");
            let (_, recomputed) = self.hash_key(hasher, &key);
            if recomputed == tag {
                chosen = Some(j);
            }
        }
        chosen
    }

    fn delete_from_two_short_one_long(
        &mut self,
        hasher: &FilterHasher,
        i: usize,
        tag: u32,
        tagshort: u32,
        tagshorthigh: u32,
    ) -> bool
    where
        K: std::hash::Hash,
    {
        let mut j = None;
        if self.read_tag(i, 0) == tagshort {
            j = Some(0);
        }
        if self.read_tag(i, 1) == tagshorthigh {
            j = Some(1);
        }
        if j == Some(1) && self.read_tag(i, 0) == tagshort {
            j = self.disambiguate(hasher, i, tag, &[0, 1]);
        }

        match j {
            Some(j_deleted @ (0 | 1)) => {
                let survivor_slot = 1 - j_deleted;
                let promoted_key = self.shadow.read(i, survivor_slot).expect("occupied slot");
                let old_long_key = self.shadow.read(i, 2);
                self.write_tag(i, j_deleted, 0); // moves slot2's long into slot0, state -> OneLong
                self.shadow.write(i, 0, old_long_key);
                self.shadow.write(i, 2, Some(promoted_key));
                self.shadow.write(i, 1, None);
                let (_, new_tag) = self.hash_key(hasher, &promoted_key);
                self.write_tag(i, 2, new_tag); // OneLong -> TwoLong
                true
            }
            _ => {
                if self.read_tag(i, 2) == tag {
                    let key_a = self.shadow.read(i, 0).expect("occupied slot");
                    let key_b = self.shadow.read(i, 1).expect("occupied slot");
                    self.write_tag(i, 2, 0); // zeros the whole bucket, state -> Empty
                    let (_, tag_a) = self.hash_key(hasher, &key_a);
                    self.write_tag(i, 0, tag_a); // Empty -> OneLong
                    self.shadow.write(i, 1, None);
                    self.shadow.write(i, 2, Some(key_b));
                    let (_, tag_b) = self.hash_key(hasher, &key_b);
                    self.write_tag(i, 2, tag_b); // OneLong -> TwoLong
                    true
                } else {
                    false
                }
            }
        }
    }

    fn delete_from_four_short(
        &mut self,
        hasher: &FilterHasher,
        i: usize,
        tag: u32,
        tagshort: u32,
        tagshorthigh: u32,
    ) -> bool
    where
        K: std::hash::Hash,
    {
        let mut j = None;
        let mut matches = 0;
        if self.read_tag(i, 0) == tagshort {
            j = Some(0);
            matches += 1;
        }
        if self.read_tag(i, 1) == tagshorthigh {
            j = Some(1);
            matches += 1;
        }
        if self.read_tag(i, 2) == tagshort {
            j = Some(2);
            matches += 1;
        }
        if self.read_tag(i, 3) == tagshorthigh {
            j = Some(3);
            matches += 1;
        }
        if matches > 1 {
            j = self.disambiguate(hasher, i, tag, &[0, 1, 2, 3]);
        }

        let Some(j_deleted) = j else {
            return false;
        };

        // Reading every surviving key before any tag is rewritten; which key fills which gap below
        // is exactly what differs between the four cases.
        let key_a = self.shadow.read(i, 0);
        let key_b = self.shadow.read(i, 1);
        let key_c = self.shadow.read(i, 2);
        let key_d = self.shadow.read(i, 3);
        self.write_tag(i, j_deleted, 0); // zeros the whole bucket, state -> Empty

        match j_deleted {
            0 => {
                let key_d = key_d.expect("occupied slot");
                self.shadow.write(i, 0, Some(key_d));
                self.shadow.write(i, 3, None);
                let (_, tag_d) = self.hash_key(hasher, &key_d);
                self.write_tag(i, 0, tag_d); // Empty -> OneLong
                let (_, tag_c) = self.hash_key(hasher, &key_c.expect("occupied slot"));
                self.write_tag(i, 2, tag_c); // OneLong -> TwoLong
                let (_, tag_b) = self.hash_key(hasher, &key_b.expect("occupied slot"));
                self.write_tag(i, 1, tag_b); // TwoLong -> TwoShortOneLong
            }
            1 => {
                let (_, tag_a) = self.hash_key(hasher, &key_a.expect("occupied slot"));
                self.write_tag(i, 0, tag_a); // Empty -> OneLong
                let (_, tag_c) = self.hash_key(hasher, &key_c.expect("occupied slot"));
                self.write_tag(i, 2, tag_c); // OneLong -> TwoLong
                let key_d = key_d.expect("occupied slot");
                let (_, tag_d) = self.hash_key(hasher, &key_d);
                self.write_tag(i, 1, tag_d); // TwoLong -> TwoShortOneLong
                self.shadow.write(i, 3, None);
                self.shadow.write(i, 1, Some(key_d));
            }
            2 => {
                let (_, tag_a) = self.hash_key(hasher, &key_a.expect("occupied slot"));
                self.write_tag(i, 0, tag_a); // Empty -> OneLong
                let key_d = key_d.expect("occupied slot");
                let (_, tag_d) = self.hash_key(hasher, &key_d);
                self.write_tag(i, 2, tag_d); // OneLong -> TwoLong
                self.shadow.write(i, 3, None);
                self.shadow.write(i, 2, Some(key_d));
                let (_, tag_b) = self.hash_key(hasher, &key_b.expect("occupied slot"));
                self.write_tag(i, 1, tag_b); // TwoLong -> TwoShortOneLong
            }
            3 => {
                let (_, tag_a) = self.hash_key(hasher, &key_a.expect("occupied slot"));
                self.write_tag(i, 0, tag_a); // Empty -> OneLong
                let (_, tag_c) = self.hash_key(hasher, &key_c.expect("occupied slot"));
                self.write_tag(i, 2, tag_c); // OneLong -> TwoLong
                let (_, tag_b) = self.hash_key(hasher, &key_b.expect("occupied slot"));
                self.write_tag(i, 1, tag_b); // TwoLong -> TwoShortOneLong
                self.shadow.write(i, 3, None);
            }
            _ => unreachable!("delete_from_four_short only selects j in 0..4"),
        }
        true
    }

    /// Attempts to place `(tag, key)` into bucket `i`. If the bucket is full and `kickout` is set,
    /// evicts a random existing member to make room for the new one.
    pub fn insert_tag_to_bucket(
        &mut self,
        i: usize,
        tag: u32,
        kickout: bool,
        key: K,
    ) -> InsertOutcome<K> {
        match self.state(i) {
            BucketState::Empty => {
                self.write_tag(i, 0, tag);
                self.shadow.write(i, 0, Some(key));
                InsertOutcome::Placed
            }
            BucketState::OneLong => {
                self.write_tag(i, 2, tag);
                self.shadow.write(i, 2, Some(key));
                InsertOutcome::Placed
            }
            BucketState::TwoLong => {
                self.write_tag(i, 1, tag);
                self.shadow.write(i, 1, Some(key));
                InsertOutcome::Placed
            }
            BucketState::TwoShortOneLong => {
                self.write_tag(i, 3, tag);
                self.shadow.write(i, 3, Some(key));
                InsertOutcome::Placed
            }
            BucketState::FourShort => {
                if !kickout {
                    return InsertOutcome::Full;
                }
                let r = rand::thread_rng().gen_range(0..4);
                let old_key = self.shadow.read(i, r).expect("occupied slot");
                let (low, high) = bucket::split_tag(tag, self.bits_per_tag);
                let value = if r == 1 || r == 3 { high } else { low };
                bucket::overwrite_short(self.bucket_mut(i), self.bits_per_tag, r, value);
                self.shadow.write(i, r, Some(key));
                InsertOutcome::Evicted(old_key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> FilterHasher {
        FilterHasher::new(1)
    }

    #[test]
    fn insert_then_find_round_trips() {
        let mut table: Table<u64> = Table::new(8, BitsPerTag::Twelve);
        let h = hasher();
        let (i, tag) = table.hash_key(&h, &42u64);
        assert!(matches!(
            table.insert_tag_to_bucket(i, tag, false, 42u64),
            InsertOutcome::Placed
        ));
        assert!(table.find_tag_in_buckets(i, i, tag));
    }

    #[test]
    fn full_bucket_without_kickout_reports_full() {
        let mut table: Table<u64> = Table::new(8, BitsPerTag::Eight);
        for k in 0..4u64 {
            let (i, tag) = table.hash_key(&hasher(), &k);
            table.insert_tag_to_bucket(i, tag, false, k);
        }
        // Force all four into the same bucket by hand to exercise the Full path directly.
        let mut solo: Table<u64> = Table::new(1, BitsPerTag::Eight);
        for (j, k) in [10u64, 11, 12, 13].into_iter().enumerate() {
            let tag = (j as u32 + 1) * 3;
            assert!(matches!(
                solo.insert_tag_to_bucket(0, tag, false, k),
                InsertOutcome::Placed
            ));
        }
        assert!(matches!(
            solo.insert_tag_to_bucket(0, 99, false, 14u64),
            InsertOutcome::Full
        ));
        assert!(matches!(
            solo.insert_tag_to_bucket(0, 99, true, 14u64),
            InsertOutcome::Evicted(_)
        ));
    }

    #[test]
    fn delete_after_insert_empties_bucket() {
        let mut table: Table<u64> = Table::new(8, BitsPerTag::Sixteen);
        let h = hasher();
        let (i, tag) = table.hash_key(&h, &7u64);
        table.insert_tag_to_bucket(i, tag, false, 7u64);
        assert!(table.delete_tag_from_bucket(&h, i, tag));
        assert!(!table.find_tag_in_buckets(i, i, tag));
        assert!(!table.delete_tag_from_bucket(&h, i, tag));
    }

    #[test]
    fn deleting_one_of_four_short_preserves_the_other_three() {
        let mut table: Table<u64> = Table::new(1, BitsPerTag::Eight);
        let h = hasher();
        let keys = [100u64, 200, 300, 400];
        let mut tags = vec![];
        for (idx, k) in keys.iter().enumerate() {
            let tag = (idx as u32 + 1) * 17;
            tags.push(tag);
            table.insert_tag_to_bucket(0, tag, false, *k);
        }
        assert_eq!(table.occupancy(0), 4);
        assert!(table.delete_tag_from_bucket(&h, 0, tags[1]));
        assert_eq!(table.occupancy(0), 3);
        for &tag in tags.iter().enumerate().filter(|(i, _)| *i != 1).map(|(_, t)| t) {
            assert!(table.find_tag_in_buckets(0, 0, tag));
        }
    }

    #[test]
    fn repair_swaps_slots_without_losing_membership() {
        let mut table: Table<u64> = Table::new(1, BitsPerTag::Eight);
        let h = hasher();
        table.insert_tag_to_bucket(0, 11, false, 1001u64);
        table.insert_tag_to_bucket(0, 22, false, 2002u64);
        table.insert_tag_to_bucket(0, 33, false, 3003u64);
        assert_eq!(table.occupancy(0), 3);

        let repaired = table.find_wrong_tag_in_buckets(&h, 0, 0, 11);
        assert!(repaired);
        assert_eq!(table.occupancy(0), 3);
        // Both keys that shared the aliased pair must still be findable under their fresh tags.
        let (_, fresh_1001) = table.hash_key(&h, &1001u64);
        let (_, fresh_2002) = table.hash_key(&h, &2002u64);
        assert!(table.find_tag_in_buckets(0, 0, fresh_1001) || table.find_tag_in_buckets(0, 0, fresh_2002));
    }
}
