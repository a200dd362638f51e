use crate::bitset::BitSet;

/// Odd-only Sieve of Eratosthenes over `[3, limit]`
///
/// Returns the odd primes up to `limit` (inclusive) in ascending order; 2 is
/// left to the caller.
/// - Index mapping: bit i represents the number (2*i + 1)
/// - A set bit means composite
/// - Time complexity: O(n log log n)
/// - Space complexity: O(n/2) bits
pub fn initial_sieve(limit: u64) -> Vec<u64> {
    if limit < 3 {
        return vec![];
    }

    let size = ((limit + 1) / 2) as usize;
    let mut composite = BitSet::new(size);

    let mut i = 3_u64;
    while i * i <= limit {
        if !composite.get((i / 2) as usize) {
            // Odd multiples only: i*i is odd, so step by 2i
            let mut j = i * i;
            while j <= limit {
                composite.set((j / 2) as usize);
                j += 2 * i;
            }
        }
        i += 2;
    }

    // Index 0 is the number 1
    composite
        .iter_zeros()
        .skip_while(|&idx| idx == 0)
        .map(|idx| 2 * idx as u64 + 1)
        .collect()
}

/// Inclusive range `[low, high]` of numbers to sieve, both ends odd.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub low: u64,
    pub high: u64,
}

impl Segment {
    /// Number of odd candidates in the segment.
    pub fn odd_count(&self) -> usize {
        ((self.high - self.low) / 2 + 1) as usize
    }
}

/// Splits `[first odd > limit, last]` into consecutive odd-aligned segments
/// spanning at most `segment_size` numbers each.
///
/// `last` must be odd and `segment_size` at least 2.
pub fn segments(limit: u64, last: u64, segment_size: u64) -> Segments {
    debug_assert!(last % 2 == 1, "segment end must be odd");
    debug_assert!(segment_size >= 2, "segments must hold at least one odd number");

    // Widest odd-to-odd span that still fits in segment_size numbers
    let span = (segment_size - 1) & !1;

    Segments {
        next_low: (limit + 1) | 1,
        last,
        span,
    }
}

/// Iterator returned by [`segments`].
#[derive(Clone, Debug)]
pub struct Segments {
    next_low: u64,
    last: u64,
    span: u64,
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.next_low > self.last {
            return None;
        }
        let low = self.next_low;
        let high = (low + self.span).min(self.last);
        self.next_low = high + 2;
        Some(Segment { low, high })
    }
}

/// Marks the composites of `segment` using the base primes.
///
/// Bit `(j - low) / 2` of the result is set iff the odd number `j` is
/// composite. The base primes must cover every odd prime up to
/// `sqrt(segment.high)`, and all of them must be below `segment.low`.
/// - Pure: the only shared input is the read-only prime list
/// - Allocates one bit per odd candidate
pub fn sieve_segment(base_primes: &[u64], segment: Segment) -> BitSet {
    let Segment { low, high } = segment;
    let mut composite = BitSet::new(segment.odd_count());

    for &p in base_primes {
        if p * p > high {
            break;
        }

        // First multiple of p that is >= low, then make it odd
        let mut first = low + (p - low % p) % p;
        if first % 2 == 0 {
            first += p;
        }

        // Mark odd multiples only
        let mut j = first;
        while j <= high {
            composite.set(((j - low) / 2) as usize);
            j += 2 * p;
        }
    }

    composite
}

/// A segment together with its composite marks, handed from a worker to the
/// draining thread.
#[derive(Debug)]
pub struct SievedSegment {
    pub segment: Segment,
    pub composite: BitSet,
}

impl SievedSegment {
    pub fn count_primes(&self) -> u64 {
        self.composite.count_zeros() as u64
    }

    /// Ascending primes of the segment.
    pub fn primes(&self) -> impl Iterator<Item = u64> + '_ {
        let low = self.segment.low;
        self.composite.iter_zeros().map(move |idx| low + 2 * idx as u64)
    }
}
