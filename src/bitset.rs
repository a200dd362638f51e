/// Packed array of bits, one per odd candidate of a sieve pass.
///
/// All bits start cleared. A set bit marks a composite, so the primes of a
/// pass are the indices left at zero.
/// - Backed by `u64` words: `ceil(len / 64)` of them
/// - Fixed size, no resizing
/// - One owner mutates; readers only look at it once marking is done
#[derive(Clone, Debug)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit index {} out of range 0..{}", idx, self.len);
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        assert!(idx < self.len, "bit index {} out of range 0..{}", idx, self.len);
        self.words[idx / 64] |= 1_u64 << (idx % 64);
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        assert!(idx < self.len, "bit index {} out of range 0..{}", idx, self.len);
        self.words[idx / 64] &= !(1_u64 << (idx % 64));
    }

    /// Number of cleared bits, counted a word at a time.
    pub fn count_zeros(&self) -> usize {
        let ones: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.len - ones
    }

    /// Ascending indices of the cleared bits.
    pub fn iter_zeros(&self) -> Zeros<'_> {
        Zeros {
            set: self,
            word_idx: 0,
            // Inverted so that unmarked candidates become set bits
            word: self.words.first().map_or(0, |w| !w),
        }
    }
}

/// Iterator returned by [`BitSet::iter_zeros`].
pub struct Zeros<'a> {
    set: &'a BitSet,
    word_idx: usize,
    word: u64,
}

impl Iterator for Zeros<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.word != 0 {
                let idx = self.word_idx * 64 + self.word.trailing_zeros() as usize;
                if idx >= self.set.len {
                    // Padding bits of the last word
                    return None;
                }
                self.word &= self.word - 1; // Clear lowest set bit
                return Some(idx);
            }

            self.word_idx += 1;
            self.word = !*self.set.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_clear() {
        let bits = BitSet::new(130);
        assert_eq!(bits.len(), 130);
        assert_eq!(bits.words.len(), 3);
        assert!((0..130).all(|i| !bits.get(i)));
        assert_eq!(bits.count_zeros(), 130);
    }

    #[test]
    fn test_set_and_clear() {
        let mut bits = BitSet::new(100);
        bits.set(0);
        bits.set(63);
        bits.set(64);
        bits.set(99);
        assert!(bits.get(0));
        assert!(bits.get(63));
        assert!(bits.get(64));
        assert!(bits.get(99));
        assert!(!bits.get(1));
        assert_eq!(bits.count_zeros(), 96);

        bits.clear(63);
        assert!(!bits.get(63));
        assert!(bits.get(64));
        assert_eq!(bits.count_zeros(), 97);
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut bits = BitSet::new(10);
        bits.set(3);
        bits.set(3);
        assert_eq!(bits.count_zeros(), 9);
    }

    #[test]
    #[should_panic]
    fn test_get_out_of_range_panics() {
        let bits = BitSet::new(64);
        bits.get(64);
    }

    #[test]
    fn test_iter_zeros_skips_set_bits_and_padding() {
        let mut bits = BitSet::new(70);
        for i in (0..70).filter(|i| i % 3 != 0) {
            bits.set(i);
        }
        let zeros: Vec<usize> = bits.iter_zeros().collect();
        let expected: Vec<usize> = (0..70).step_by(3).collect();
        assert_eq!(zeros, expected);
        assert_eq!(bits.count_zeros(), expected.len());
    }

    #[test]
    fn test_iter_zeros_full_and_empty() {
        let mut full = BitSet::new(128);
        for i in 0..128 {
            full.set(i);
        }
        assert_eq!(full.iter_zeros().next(), None);

        let empty = BitSet::new(0);
        assert_eq!(empty.iter_zeros().next(), None);
        assert_eq!(empty.count_zeros(), 0);
    }
}
