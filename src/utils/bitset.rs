//! A fixed-capacity bit vector.
//!
//! Used as the byte map of a recovered struct: bit `i` is set when byte `i` of the struct was
//! touched by at least one observed memory access. Bits are only ever set, never cleared, so
//! the marked region of a struct can only widen.
//!
//! # Example
//!
//! ```rust
//! use layoutscope::utils::BitSet;
//!
//! let mut bytes = BitSet::new(16);
//! bytes.insert_range(0, 4);
//! bytes.insert_range(8, 4);
//!
//! assert!(bytes.contains(3));
//! assert!(!bytes.contains(4));
//! assert_eq!(bytes.count(), 8);
//! assert_eq!(bytes.clear_runs(), vec![(4, 4), (12, 4)]);
//! ```

/// A bit vector with a fixed number of addressable bits.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// The number of addressable bits.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Sets `count` bits starting at `start`, clamped to the capacity.
    ///
    /// Returns the number of bits that were newly set.
    pub fn insert_range(&mut self, start: usize, count: usize) -> usize {
        let end = start.saturating_add(count).min(self.len);
        let mut added = 0;
        for index in start..end {
            let mask = 1u64 << (index % 64);
            let word = &mut self.words[index / 64];
            if *word & mask == 0 {
                *word |= mask;
                added += 1;
            }
        }
        added
    }

    /// Returns `true` if the bit at the given index is set. Indices past the capacity read as
    /// unset.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && (self.words[index / 64] & (1u64 << (index % 64))) != 0
    }

    /// Returns the number of bits set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the maximal runs of unset bits as `(start, length)` pairs in ascending order.
    #[must_use]
    pub fn clear_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = None;
        for index in 0..self.len {
            match (self.contains(index), start) {
                (false, None) => start = Some(index),
                (true, Some(s)) => {
                    runs.push((s, index - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, self.len - s));
        }
        runs
    }

    /// Returns an iterator over the indices of set bits.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            next: 0,
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (n, i) in self.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{i}")?;
        }
        write!(f, "}}")
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    next: usize,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.set.len {
            let word = self.set.words[self.next / 64] >> (self.next % 64);
            if word == 0 {
                // Skip the rest of an empty word
                self.next = (self.next / 64 + 1) * 64;
                continue;
            }
            let index = self.next + word.trailing_zeros() as usize;
            if index >= self.set.len {
                break;
            }
            self.next = index + 1;
            return Some(index);
        }
        self.next = self.set.len;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());
        assert_eq!(bs.count(), 0);

        bs.insert(0);
        bs.insert(63);
        bs.insert(64);
        bs.insert(99);

        assert!(!bs.is_empty());
        assert_eq!(bs.count(), 4);
        assert!(bs.contains(63));
        assert!(bs.contains(64));
        assert!(!bs.contains(1));
        assert!(!bs.contains(500));
    }

    #[test]
    fn test_insert_range_clamps() {
        let mut bs = BitSet::new(10);
        assert_eq!(bs.insert_range(8, 4), 2);
        assert_eq!(bs.insert_range(6, 4), 2);
        assert_eq!(bs.count(), 4);
        assert_eq!(bs.insert_range(20, 4), 0);
    }

    #[test]
    fn test_zero_capacity() {
        let mut bs = BitSet::new(0);
        assert_eq!(bs.insert_range(0, 4), 0);
        assert!(bs.clear_runs().is_empty());
        assert_eq!(bs.iter().count(), 0);
    }

    #[test]
    fn test_clear_runs() {
        let mut bs = BitSet::new(12);
        assert_eq!(bs.clear_runs(), vec![(0, 12)]);

        bs.insert_range(2, 3);
        bs.insert_range(8, 4);
        assert_eq!(bs.clear_runs(), vec![(0, 2), (5, 3)]);
    }

    #[test]
    fn test_bitset_iter() {
        let mut bs = BitSet::new(200);
        bs.insert(5);
        bs.insert(42);
        bs.insert(130);
        bs.insert(199);

        let bits: Vec<_> = bs.iter().collect();
        assert_eq!(bits, vec![5, 42, 130, 199]);
        assert_eq!(format!("{bs:?}"), "{5, 42, 130, 199}");
    }
}
