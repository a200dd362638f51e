//! Counts and lists the primes below a bound.
//!
//! Small bounds run a single odd-only sieve. Large bounds run a segmented
//! sieve whose segments are spread over a bounded, order-preserving worker
//! pool, so memory stays capped and primes still come out in ascending order.

pub mod bitset;
pub mod pool;
pub mod primes;
pub mod sieve;
pub mod storage;

pub use sieve::{MAX_BOUND, Sieve, SieveConfig, SieveError};
