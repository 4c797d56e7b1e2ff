//! Fixed-size worker pool for bulk jobs across many containers
//!
//! Workers claim items one at a time under a lock that guards only the claim;
//! the work itself runs off-lock. A failing or panicking item is logged and
//! dropped so its siblings keep running. Callers only see the side effects
//! their work callback performs.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Configuration for [`WorkerPool`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent worker slots (default: 4, max: 16)
    pub slots: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { slots: 4 }
    }
}

impl PoolConfig {
    /// Two slots, for low-memory systems
    pub fn conservative() -> Self {
        Self { slots: 2 }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    /// Eight slots, for machines with plenty of cores and memory
    pub fn aggressive() -> Self {
        Self { slots: 8 }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        assert!(slots > 0, "slots must be at least 1");
        assert!(slots <= 16, "slots should not exceed 16");
        self.slots = slots;
        self
    }
}

/// Runs a batch of independent work items on a bounded set of threads
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn slots(&self) -> usize {
        self.config.slots
    }

    /// Run `work` once per item and block until every item is done
    ///
    /// Errors and panics inside `work` are logged and swallowed.
    pub fn run<T, E, F>(&self, items: Vec<T>, work: F)
    where
        T: Send,
        E: Display,
        F: Fn(T) -> Result<(), E> + Sync,
    {
        let total = items.len();
        let workers = self.config.slots.min(total);
        let queue = Mutex::new(items.into_iter().enumerate());

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    // hold the lock only while claiming the next item
                    let claimed = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .next();
                    let Some((index, item)) = claimed else {
                        break;
                    };

                    match panic::catch_unwind(AssertUnwindSafe(|| work(item))) {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => log::warn!("work item {} failed: {}", index, err),
                        Err(_) => log::warn!("work item {} panicked", index),
                    }
                });
            }
        });
        log::debug!("worker pool finished {} item(s) on {} slot(s)", total, workers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults() {
        assert_eq!(PoolConfig::default().slots, 4);
        assert_eq!(PoolConfig::balanced().slots, 4);
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(PoolConfig::conservative().slots, 2);
        assert_eq!(PoolConfig::aggressive().slots, 8);
        assert_eq!(PoolConfig::default().with_slots(12).slots, 12);
    }

    #[test]
    #[should_panic(expected = "slots must be at least 1")]
    fn test_invalid_slots_zero() {
        PoolConfig::default().with_slots(0);
    }

    #[test]
    #[should_panic(expected = "slots should not exceed 16")]
    fn test_invalid_slots_too_high() {
        PoolConfig::default().with_slots(17);
    }

    #[test]
    fn every_item_runs_once() {
        let seen = Mutex::new(HashSet::new());
        WorkerPool::new(PoolConfig::conservative()).run((0..50).collect(), |n: u32| {
            assert!(seen.lock().unwrap().insert(n));
            Ok::<(), String>(())
        });
        assert_eq!(seen.into_inner().unwrap().len(), 50);
    }

    #[test]
    fn failures_and_panics_do_not_stop_siblings() {
        let done = AtomicUsize::new(0);
        WorkerPool::default().run((0..20).collect(), |n: u32| {
            if n % 5 == 0 {
                return Err(format!("item {} is corrupt", n));
            }
            if n == 7 {
                panic!("bad page");
            }
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // 0, 5, 10, 15 fail and 7 panics
        assert_eq!(done.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn concurrency_is_bounded_by_slots() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        WorkerPool::new(PoolConfig::conservative()).run((0..12).collect(), |_: u32| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), String>(())
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        WorkerPool::default().run(Vec::<u32>::new(), |_| Ok::<(), String>(()));
    }
}
