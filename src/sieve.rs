use std::sync::Arc;

use crate::pool::{OrderedPool, PoolError};
use crate::primes::{self, SievedSegment};

/// Exclusive upper limit for bounds: `n` must lie in `[0, 2^32 - 1)`.
pub const MAX_BOUND: i64 = 4_294_967_295;

/// Tuning knobs of a [`Sieve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SieveConfig {
    /// Normalized bounds at or above this use the segmented parallel path.
    pub large_threshold: u64,
    /// Numbers spanned by one segment (half of them odd candidates).
    pub segment_size: u64,
    /// Worker threads in the segment pool.
    pub workers: usize,
    /// Segments dispatched-but-undrained at once; bounds peak memory.
    pub resident_cap: usize,
}

impl SieveConfig {
    pub const DEFAULT_LARGE_THRESHOLD: u64 = 1_000_000;
    pub const DEFAULT_SEGMENT_SIZE: u64 = 1 << 23;
    pub const DEFAULT_RESIDENT_CAP: usize = 10;

    /// Available parallelism minus one, but never fewer than two workers.
    pub fn default_workers() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.saturating_sub(1).max(2)
    }

    pub fn validate(&self) -> Result<(), SieveError> {
        if self.segment_size < 2 {
            return Err(SieveError::InvalidConfig("segment size must be at least 2"));
        }
        if self.workers == 0 {
            return Err(SieveError::InvalidConfig("worker count must be positive"));
        }
        if self.resident_cap == 0 {
            return Err(SieveError::InvalidConfig("resident cap must be positive"));
        }
        Ok(())
    }
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            large_threshold: Self::DEFAULT_LARGE_THRESHOLD,
            segment_size: Self::DEFAULT_SEGMENT_SIZE,
            workers: Self::default_workers(),
            resident_cap: Self::DEFAULT_RESIDENT_CAP,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SieveError {
    #[error("bound must be in [0, {max}), got {0}", max = MAX_BOUND)]
    InvalidBound(i64),
    #[error("invalid sieve configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("segmented sieve did not complete: {0}")]
    SegmentFailed(#[from] PoolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Counts, and optionally lists, the primes below a bound.
///
/// Small bounds are sieved in one pass. Large bounds sieve the primes up to
/// `sqrt(N)` first, then fan fixed-size segments out to a bounded worker
/// pool and drain them in ascending order, so primes come out sorted without
/// any merge step.
#[derive(Clone, Debug)]
pub struct Sieve {
    config: SieveConfig,
}

impl Sieve {
    pub fn new(config: SieveConfig) -> Result<Self, SieveError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SieveConfig {
        &self.config
    }

    /// Number of primes strictly below `bound`.
    pub fn count(&self, bound: i64) -> Result<u64, SieveError> {
        self.run(bound, None)
    }

    /// Calls `emit` with every prime strictly below `bound`, in ascending
    /// order, and returns how many there were.
    pub fn list(&self, bound: i64, mut emit: impl FnMut(u64)) -> Result<u64, SieveError> {
        self.run(bound, Some(&mut emit))
    }

    pub fn primes_below(&self, bound: i64) -> Result<Vec<u64>, SieveError> {
        let mut primes = Vec::new();
        self.list(bound, |p| primes.push(p))?;
        Ok(primes)
    }

    fn run(&self, bound: i64, mut emit: Option<&mut dyn FnMut(u64)>) -> Result<u64, SieveError> {
        if !(0..MAX_BOUND).contains(&bound) {
            return Err(SieveError::InvalidBound(bound));
        }
        let n = bound as u64;

        // No primes in [0..1]
        if n <= 2 {
            return Ok(0);
        }

        // 2 is the only even prime and is never sieved
        if let Some(emit) = emit.as_mut() {
            emit(2);
        }
        if n == 3 {
            return Ok(1);
        }

        // Sieve [1..n-1]; if n is odd then n-1 is even and can be skipped
        let last = (n - 1) - (n & 1);
        let large = last >= self.config.large_threshold;
        let limit = if large { last.isqrt() } else { last };

        let base_primes = primes::initial_sieve(limit);
        let mut count = base_primes.len() as u64 + 1;
        if let Some(emit) = emit.as_mut() {
            for &p in &base_primes {
                emit(p);
            }
        }

        if large {
            count += self.sieve_segments(base_primes, limit, last, emit)?;
        }

        log::debug!("bound {bound}: {count} primes (segmented: {large})");
        Ok(count)
    }

    /// Sieves the odd numbers in `(limit, last]` through the worker pool.
    fn sieve_segments(
        &self,
        base_primes: Vec<u64>,
        limit: u64,
        last: u64,
        mut emit: Option<&mut dyn FnMut(u64)>,
    ) -> Result<u64, SieveError> {
        let base_primes: Arc<[u64]> = base_primes.into();
        let mut pool = OrderedPool::new(self.config.workers, self.config.resident_cap)?;

        let mut submitted = 0_usize;
        for segment in primes::segments(limit, last, self.config.segment_size) {
            let base_primes = Arc::clone(&base_primes);
            pool.submit(move || SievedSegment {
                segment,
                composite: primes::sieve_segment(&base_primes, segment),
            })?;
            submitted += 1;
        }
        log::debug!(
            "submitted {submitted} segments over ({limit}, {last}] to {} workers",
            pool.num_workers()
        );

        let mut count = 0;
        while let Some(sieved) = pool.take()? {
            match emit.as_mut() {
                Some(emit) => {
                    for p in sieved.primes() {
                        emit(p);
                        count += 1;
                    }
                }
                None => count += sieved.count_primes(),
            }
            // The bit set is released here, before the next take
        }

        let stats = pool.stats();
        log::trace!("segment pool stats: {stats:?}");
        debug_assert_eq!(stats.taken, submitted);
        Ok(count)
    }
}
