//! Bounded, order-preserving task pool.
//!
//! Jobs are submitted from a single controlling thread, run on a fixed set of
//! worker threads, and handed back to that same thread strictly in submission
//! order. At most `resident_cap` jobs are dispatched-but-undrained at any
//! time; further submissions wait in a queue until the consumer catches up.

use crossbeam_utils::sync::{Parker, Unparker};
use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Reason a pool stopped handing out results.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("a pool job panicked: {0}")]
    JobPanicked(String),
    #[error("the pool was shut down")]
    Aborted,
}

/// Counters describing what a pool has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub dispatched: usize,
    pub taken: usize,
    /// Highest number of dispatched-but-undrained jobs seen at once.
    pub peak_resident: usize,
}

enum Slot<T> {
    Pending,
    Done(T),
    Cancelled,
}

/// Completion slot of one dispatched job: written once by a worker (or by
/// shutdown), read once by the consumer.
struct Handle<T> {
    slot: Mutex<Slot<T>>,
    consumer: Unparker,
}

impl<T> Handle<T> {
    fn new(consumer: Unparker) -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            consumer,
        }
    }

    /// Stores the outcome unless one is already there, then wakes the consumer.
    fn fill(&self, outcome: Slot<T>) {
        {
            let mut slot = lock(&self.slot);
            if matches!(*slot, Slot::Pending) {
                *slot = outcome;
            }
        }
        self.consumer.unpark();
    }

    /// Parks the consumer until this job has an outcome.
    ///
    /// Other jobs share the same unparker, so a wakeup only means "check
    /// again".
    fn wait(&self, parker: &Parker) -> Slot<T> {
        loop {
            {
                let mut slot = lock(&self.slot);
                if !matches!(*slot, Slot::Pending) {
                    return mem::replace(&mut *slot, Slot::Cancelled);
                }
            }
            parker.park();
        }
    }
}

struct State<T> {
    /// Submitted, held back until the resident count drops below the cap.
    queued: VecDeque<Job<T>>,
    /// Dispatched, waiting for a free worker thread.
    runnable: VecDeque<(Job<T>, Arc<Handle<T>>)>,
    /// Dispatched and not yet drained, in submission order.
    in_flight: VecDeque<Arc<Handle<T>>>,
    aborted: Option<PoolError>,
    stats: PoolStats,
}

impl<T> State<T> {
    /// Moves queued jobs to the workers while the resident cap allows it.
    /// Returns how many were dispatched.
    fn dispatch(&mut self, resident_cap: usize, consumer: &Unparker) -> usize {
        let mut dispatched = 0;
        while self.aborted.is_none() && self.in_flight.len() < resident_cap {
            let Some(job) = self.queued.pop_front() else {
                break;
            };
            let handle = Arc::new(Handle::new(consumer.clone()));
            self.in_flight.push_back(Arc::clone(&handle));
            self.runnable.push_back((job, handle));

            self.stats.dispatched += 1;
            self.stats.peak_resident = self.stats.peak_resident.max(self.in_flight.len());
            dispatched += 1;
        }
        dispatched
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    work_ready: Condvar,
    resident_cap: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        lock(&self.state)
    }

    fn wake_workers(&self, count: usize) {
        for _ in 0..count {
            self.work_ready.notify_one();
        }
    }

    /// One-way transition to the aborted state. Pending jobs are dropped and
    /// every outstanding handle is cancelled so no consumer stays parked.
    fn abort(&self, reason: PoolError) {
        let (dropped_jobs, cancelled) = {
            let mut state = self.lock();
            if state.aborted.is_some() {
                return;
            }
            log::debug!("pool aborting: {reason}");
            state.aborted = Some(reason);
            state.queued.clear();
            let runnable = mem::take(&mut state.runnable);
            let in_flight = mem::take(&mut state.in_flight);
            (runnable, in_flight)
        };

        for (job, handle) in dropped_jobs {
            drop(job);
            handle.fill(Slot::Cancelled);
        }
        for handle in cancelled {
            handle.fill(Slot::Cancelled);
        }
        self.work_ready.notify_all();
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    // Jobs never run under a pool lock, so a poisoned lock still holds
    // consistent state.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn worker_loop<T>(id: usize, shared: Arc<Shared<T>>) {
    loop {
        let (job, handle) = {
            let mut state = shared.lock();
            loop {
                if let Some(entry) = state.runnable.pop_front() {
                    break entry;
                }
                if state.aborted.is_some() {
                    log::trace!("[worker {id}] exiting");
                    return;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(value) => handle.fill(Slot::Done(value)),
            Err(payload) => {
                let msg = panic_message(&*payload);
                log::error!("[worker {id}] job panicked ({msg}), shutting down the pool");
                // Record the reason before the consumer can observe the cancellation
                shared.abort(PoolError::JobPanicked(msg));
                handle.fill(Slot::Cancelled);
            }
        }
    }
}

/// Fixed-size worker pool delivering results in submission order with a cap
/// on resident results.
///
/// `submit` never waits for a job; `take` waits for the oldest outstanding
/// job only, and does so outside the pool lock. A panicking job aborts the
/// whole pool: every later `take` fails instead of reporting exhaustion.
pub struct OrderedPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    parker: Parker,
    consumer: Unparker,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> OrderedPool<T> {
    /// Spawns `num_workers` threads; at most `resident_cap` jobs are
    /// dispatched-but-undrained at once.
    pub fn new(num_workers: usize, resident_cap: usize) -> io::Result<Self> {
        assert!(num_workers > 0, "pool needs at least one worker");
        assert!(resident_cap > 0, "resident cap must be positive");

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queued: VecDeque::new(),
                runnable: VecDeque::new(),
                in_flight: VecDeque::new(),
                aborted: None,
                stats: PoolStats::default(),
            }),
            work_ready: Condvar::new(),
            resident_cap,
        });

        let parker = Parker::new();
        let consumer = parker.unparker().clone();
        let mut pool = Self {
            shared,
            parker,
            consumer,
            workers: Vec::with_capacity(num_workers),
        };

        for id in 0..num_workers {
            let shared = Arc::clone(&pool.shared);
            // On error the partially built pool is dropped, which stops the
            // workers spawned so far.
            let worker = thread::Builder::new()
                .name(format!("primelist-worker-{id}"))
                .spawn(move || worker_loop(id, shared))?;
            pool.workers.push(worker);
        }

        log::debug!("pool started: {num_workers} workers, resident cap {resident_cap}");
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn resident_cap(&self) -> usize {
        self.shared.resident_cap
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats
    }

    /// Enqueues a job, dispatching it right away if the resident cap allows.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let dispatched = {
            let mut state = self.shared.lock();
            if let Some(reason) = &state.aborted {
                return Err(reason.clone());
            }
            state.queued.push_back(Box::new(job));
            state.stats.submitted += 1;
            state.dispatch(self.shared.resident_cap, &self.consumer)
        };
        self.shared.wake_workers(dispatched);
        Ok(())
    }

    /// Returns the result of the oldest job not yet taken, waiting for it if
    /// needed.
    ///
    /// `Ok(None)` means every submitted job has been taken. After an abort
    /// this always returns the abort reason.
    pub fn take(&mut self) -> Result<Option<T>, PoolError> {
        let handle = {
            let mut state = self.shared.lock();
            if let Some(reason) = &state.aborted {
                return Err(reason.clone());
            }
            match state.in_flight.pop_front() {
                Some(handle) => handle,
                None => {
                    debug_assert!(state.queued.is_empty());
                    return Ok(None);
                }
            }
        };

        // Must not hold the pool lock here: workers need it to make progress
        match handle.wait(&self.parker) {
            Slot::Done(value) => {
                let dispatched = {
                    let mut state = self.shared.lock();
                    state.stats.taken += 1;
                    state.dispatch(self.shared.resident_cap, &self.consumer)
                };
                self.shared.wake_workers(dispatched);
                Ok(Some(value))
            }
            Slot::Pending | Slot::Cancelled => Err(self
                .shared
                .lock()
                .aborted
                .clone()
                .unwrap_or(PoolError::Aborted)),
        }
    }

    /// Stops dispatching and cancels all outstanding work. Jobs already
    /// running are left to finish and their results discarded.
    pub fn shutdown(&self) {
        self.shared.abort(PoolError::Aborted);
    }
}

impl<T: Send + 'static> Drop for OrderedPool<T> {
    fn drop(&mut self) {
        self.shared.abort(PoolError::Aborted);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("pool worker terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_take_on_empty_pool() {
        let mut pool = OrderedPool::<u32>::new(2, 2).unwrap();
        assert_eq!(pool.take(), Ok(None));
        assert_eq!(pool.take(), Ok(None));
        assert_eq!(pool.num_workers(), 2);
        assert_eq!(pool.resident_cap(), 2);
    }

    #[test]
    fn test_results_follow_submission_order_when_later_jobs_finish_first() {
        let jobs = 8;
        let mut pool = OrderedPool::new(jobs, jobs).unwrap();
        for i in 0..jobs {
            // First job sleeps longest
            let delay = Duration::from_millis(20 * (jobs - i) as u64);
            pool.submit(move || {
                thread::sleep(delay);
                i
            })
            .unwrap();
        }

        let mut taken = Vec::new();
        while let Some(i) = pool.take().unwrap() {
            taken.push(i);
        }
        assert_eq!(taken, (0..jobs).collect::<Vec<_>>());
    }

    #[test]
    fn test_results_follow_submission_order_with_random_delays() {
        let mut rng = rand::rng();
        let mut pool = OrderedPool::new(3, 4).unwrap();
        for i in 0..60_u32 {
            let delay = Duration::from_micros(rng.random_range(0..3000));
            pool.submit(move || {
                thread::sleep(delay);
                i
            })
            .unwrap();
        }

        let taken: Vec<u32> = std::iter::from_fn(|| pool.take().unwrap()).collect();
        assert_eq!(taken, (0..60).collect::<Vec<_>>());

        let stats = pool.stats();
        assert_eq!(stats.submitted, 60);
        assert_eq!(stats.dispatched, 60);
        assert_eq!(stats.taken, 60);
        assert!(stats.peak_resident <= 4);
    }

    #[test]
    fn test_dispatch_is_held_back_by_resident_cap() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut pool = OrderedPool::new(4, 3).unwrap();
        for i in 0..10 {
            let started = Arc::clone(&started);
            pool.submit(move || {
                started.fetch_add(1, Ordering::SeqCst);
                i
            })
            .unwrap();
        }

        // Nobody drains, so only the first three may ever start
        thread::sleep(Duration::from_millis(100));
        assert!(started.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.dispatched, 3);

        let taken: Vec<i32> = std::iter::from_fn(|| pool.take().unwrap()).collect();
        assert_eq!(taken, (0..10).collect::<Vec<_>>());
        assert_eq!(started.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().peak_resident, 3);
    }

    #[test]
    fn test_undrained_jobs_never_exceed_cap() {
        let cap = 2;
        let mut rng = rand::rng();

        let mut pool = OrderedPool::new(4, cap).unwrap();
        for i in 0..40_u32 {
            let delay = Duration::from_micros(rng.random_range(0..500));
            pool.submit(move || {
                thread::sleep(delay);
                i
            })
            .unwrap();
            let stats = pool.stats();
            assert!(stats.dispatched - stats.taken <= cap);
        }

        let mut expected = 0;
        while let Some(i) = pool.take().unwrap() {
            assert_eq!(i, expected);
            expected += 1;
            let stats = pool.stats();
            assert!(stats.dispatched - stats.taken <= cap);
        }
        assert_eq!(expected, 40);
        assert_eq!(pool.stats().peak_resident, cap);
    }

    #[test]
    fn test_pool_is_reusable_after_draining() {
        let mut pool = OrderedPool::new(2, 2).unwrap();
        pool.submit(|| 1).unwrap();
        assert_eq!(pool.take(), Ok(Some(1)));
        assert_eq!(pool.take(), Ok(None));
        pool.submit(|| 2).unwrap();
        pool.submit(|| 3).unwrap();
        assert_eq!(pool.take(), Ok(Some(2)));
        assert_eq!(pool.take(), Ok(Some(3)));
        assert_eq!(pool.take(), Ok(None));
    }

    #[test]
    fn test_panicking_job_aborts_pool() {
        let mut pool = OrderedPool::<i32>::new(2, 4).unwrap();
        pool.submit(|| 1).unwrap();
        pool.submit(|| -> i32 { panic!("boom") }).unwrap();
        pool.submit(|| 3).unwrap();

        // The first job may or may not complete before the abort lands
        let first = pool.take();
        let failure = match first {
            Ok(Some(1)) => pool.take(),
            other => other,
        };
        assert_eq!(failure, Err(PoolError::JobPanicked("boom".to_string())));

        // Exhaustion is never reported after an abort
        assert_eq!(
            pool.take(),
            Err(PoolError::JobPanicked("boom".to_string()))
        );
        assert!(pool.submit(|| 4).is_err());
    }

    #[test]
    fn test_shutdown_cancels_outstanding_work() {
        let mut pool = OrderedPool::new(1, 2).unwrap();
        for i in 0..5 {
            pool.submit(move || {
                thread::sleep(Duration::from_millis(20));
                i
            })
            .unwrap();
        }
        pool.shutdown();
        pool.shutdown();

        assert_eq!(pool.take(), Err(PoolError::Aborted));
        assert_eq!(pool.submit(|| 9), Err(PoolError::Aborted));
    }
}
