//! Bounded Number Pools
//!
//! Lowest-free allocation of integer identifiers out of a fixed inclusive
//! range, backed by a bitmask. One pool instance exists per identifier space
//! (layer ids, device minor numbers), constructed at control-plane startup
//! and injected into the components that allocate from it.
//!
//! The pool is internally locked and therefore safe to share, but uniqueness
//! across *records* (id allocation plus the persistence of the record using
//! it) relies on the caller's exclusive reconciliation scope: an aborted
//! transaction must release the ids it allocated.

use crate::error::{Error, Result};
use parking_lot::Mutex;

const WORD_BITS: u32 = u64::BITS;

/// Bounded unique-integer allocator over an inclusive range
#[derive(Debug)]
pub struct NumberPool {
    name: String,
    min: u32,
    max: u32,
    bits: Mutex<BitSet>,
}

#[derive(Debug)]
struct BitSet {
    words: Vec<u64>,
    occupied: u32,
}

impl NumberPool {
    /// Create a pool handing out values in `[min, max]`
    pub fn new(name: impl Into<String>, min: u32, max: u32) -> Self {
        assert!(min <= max, "number pool range must not be empty");
        let capacity = max - min + 1;
        let words = capacity.div_ceil(WORD_BITS) as usize;
        Self {
            name: name.into(),
            min,
            max,
            bits: Mutex::new(BitSet {
                words: vec![0; words],
                occupied: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of values the pool can hand out in total
    pub fn capacity(&self) -> u32 {
        self.max - self.min + 1
    }

    /// Number of values currently allocated
    pub fn occupied(&self) -> u32 {
        self.bits.lock().occupied
    }

    /// Allocate the lowest currently-unused value.
    ///
    /// Fails with [`Error::PoolExhausted`] when every value in the range is
    /// in use.
    pub fn allocate(&self) -> Result<u32> {
        let mut bits = self.bits.lock();
        for (word_idx, word) in bits.words.iter().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                let offset = word_idx as u32 * WORD_BITS + bit;
                let value = self.min + offset;
                if value > self.max {
                    break;
                }
                bits.words[word_idx] |= 1u64 << bit;
                bits.occupied += 1;
                return Ok(value);
            }
        }
        Err(Error::PoolExhausted {
            pool: self.name.clone(),
        })
    }

    /// Allocate a specific value.
    ///
    /// Fails with [`Error::ValueOutOfRange`] outside the pool's range and
    /// with [`Error::AlreadyExists`] when the value is already in use.
    pub fn allocate_specific(&self, value: u32) -> Result<()> {
        let (word_idx, mask) = self.locate(value)?;
        let mut bits = self.bits.lock();
        if bits.words[word_idx] & mask != 0 {
            return Err(Error::AlreadyExists {
                kind: format!("number in pool '{}'", self.name),
                name: value.to_string(),
            });
        }
        bits.words[word_idx] |= mask;
        bits.occupied += 1;
        Ok(())
    }

    /// Release a value, making it immediately eligible for reuse.
    ///
    /// Releasing a value that is not allocated is a no-op.
    pub fn release(&self, value: u32) -> Result<()> {
        let (word_idx, mask) = self.locate(value)?;
        let mut bits = self.bits.lock();
        if bits.words[word_idx] & mask != 0 {
            bits.words[word_idx] &= !mask;
            bits.occupied -= 1;
        }
        Ok(())
    }

    fn locate(&self, value: u32) -> Result<(usize, u64)> {
        if value < self.min || value > self.max {
            return Err(Error::ValueOutOfRange {
                pool: self.name.clone(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        let offset = value - self.min;
        Ok(((offset / WORD_BITS) as usize, 1u64 << (offset % WORD_BITS)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::BTreeSet;

    #[test]
    fn test_lowest_free_allocation() {
        let pool = NumberPool::new("layer-ids", 1, 100);
        assert_eq!(pool.allocate().unwrap(), 1);
        assert_eq!(pool.allocate().unwrap(), 2);
        assert_eq!(pool.allocate().unwrap(), 3);

        pool.release(2).unwrap();
        assert_eq!(pool.allocate().unwrap(), 2);
        assert_eq!(pool.allocate().unwrap(), 4);
    }

    #[test]
    fn test_uniqueness() {
        let pool = NumberPool::new("ids", 1, 200);
        let mut seen = BTreeSet::new();
        for _ in 0..150 {
            assert!(seen.insert(pool.allocate().unwrap()));
        }
        assert_eq!(pool.occupied(), 150);
    }

    #[test]
    fn test_exhaustion_boundary() {
        let capacity = 70u32; // crosses a word boundary
        let pool = NumberPool::new("small", 1, capacity);

        let mut values = BTreeSet::new();
        for _ in 0..capacity {
            assert!(values.insert(pool.allocate().unwrap()));
        }
        assert_matches!(pool.allocate(), Err(Error::PoolExhausted { .. }));

        pool.release(33).unwrap();
        assert_eq!(pool.allocate().unwrap(), 33);
        assert_matches!(pool.allocate(), Err(Error::PoolExhausted { .. }));
    }

    #[test]
    fn test_allocate_specific() {
        let pool = NumberPool::new("minors", 1000, 1010);
        pool.allocate_specific(1005).unwrap();
        assert_matches!(
            pool.allocate_specific(1005),
            Err(Error::AlreadyExists { .. })
        );
        assert_matches!(
            pool.allocate_specific(999),
            Err(Error::ValueOutOfRange { .. })
        );
        // lowest-free skips the explicitly taken value
        assert_eq!(pool.allocate().unwrap(), 1000);
    }

    #[test]
    fn test_release_out_of_range() {
        let pool = NumberPool::new("ids", 10, 20);
        assert_matches!(pool.release(9), Err(Error::ValueOutOfRange { .. }));
        // releasing an unallocated in-range value is tolerated
        pool.release(15).unwrap();
        assert_eq!(pool.occupied(), 0);
    }
}
