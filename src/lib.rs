//! # flexfilter
//!
//! An adaptive-fingerprint cuckoo filter: approximate set membership in a fixed amount of memory.
//! Like a [Bloom filter], it can claim that an entry is
//!
//! * definitely not in the set, or
//! * might be in the set (with some false-positive rate),
//!
//! but unlike a Bloom filter, entries can also be deleted. Where this crate diverges from a
//! textbook cuckoo filter is in how a bucket encodes its fingerprints: a sparse bucket keeps a
//! couple of long, low-collision fingerprints, while a crowded one repacks the same bits into four
//! short ones, trading false-positive rate for the extra slot. A `change_fingerprint` call lets a
//! caller who already knows a query was a false positive repair the two fingerprints that aliased,
//! without touching what the filter reports for anything else.
//!
//! [Bloom filter]: https://en.wikipedia.org/wiki/Bloom_filter
//!
//! ## flexfilter in action
//!
//! ```rust
//! use flexfilter::CuckooFilter;
//!
//! fn main() {
//!     // The number of items we expect the filter to hold.
//!     let capacity = 100_000;
//!     let mut filter = CuckooFilter::new(capacity);
//!
//!     // `CuckooFilter` can store any type that is `Copy + Hash`.
//!     filter.add(1u64).unwrap();
//!     filter.add(2u64).unwrap();
//!
//!     // Querying never yields a false negative for a key that's still in the filter.
//!     assert!(filter.contains(1u64).is_ok());
//!
//!     // But it can yield false positives.
//!     let mut false_positives = 0;
//!     for i in 0..10_000u64 {
//!         if filter.contains(capacity as u64 + i).is_ok() {
//!             false_positives += 1;
//!         }
//!     }
//!     println!("False positives: {false_positives}");
//!
//!     // Unlike a Bloom filter, items can be removed.
//!     filter.delete(1u64).unwrap();
//!     assert!(filter.contains(1u64).is_err());
//!
//!     println!("{}", filter.info());
//! }
//! ```

pub mod bucket;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod shadow;
pub mod table;

pub use bucket::BitsPerTag;
pub use error::CuckooError;
pub use filter::CuckooFilter;
