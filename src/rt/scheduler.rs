//! Parallel work-unit scheduler.
//!
//! A thin poll-only layer over rayon: [`TaskScheduler::schedule`] runs a
//! closure once per unit on the pool and hands back a [`TaskHandle`] the
//! caller polls from its `update()` loop. There is deliberately no blocking
//! join; render lifecycles advance by polling, and cancellation is a flag
//! the closure checks between pixels.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Worker pool for CPU sample-generation tasks.
pub struct TaskScheduler {
    /// `None` means the rayon global pool.
    pool: Option<rayon::ThreadPool>,
    threads: u32,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// Scheduler over the rayon global pool.
    pub fn new() -> Self {
        Self {
            pool: None,
            threads: rayon::current_num_threads() as u32,
        }
    }

    /// Scheduler with its own pool of `threads` workers; `0` falls back to
    /// the global pool.
    pub fn with_threads(threads: u32) -> Self {
        if threads == 0 {
            return Self::new();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads as usize)
            .thread_name(|i| format!("helios-worker-{i}"))
            .build()
        {
            Ok(pool) => Self {
                pool: Some(pool),
                threads,
            },
            Err(e) => {
                tracing::warn!(error = %e, "dedicated pool creation failed, using global pool");
                Self::new()
            }
        }
    }

    /// Number of workers; the natural producer count for
    /// [`crate::film::Film::resize`].
    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.threads
    }

    /// Runs `f` once per unit in `0..units`, in parallel. The closure must
    /// poll [`TaskContext::is_cancelled`] at a reasonable granularity for
    /// immediate stops to feel immediate.
    pub fn schedule<F>(&self, units: u32, f: F) -> TaskHandle
    where
        F: Fn(&TaskContext) + Send + Sync + 'static,
    {
        let shared = Arc::new(TaskShared {
            pending: AtomicU32::new(units),
            cancelled: AtomicBool::new(false),
        });
        let f = Arc::new(f);

        for unit in 0..units {
            let shared = Arc::clone(&shared);
            let f = Arc::clone(&f);
            let work = move || {
                let ctx = TaskContext {
                    unit,
                    thread_id: rayon::current_thread_index().unwrap_or(0) as u32,
                    shared: Arc::clone(&shared),
                };
                f(&ctx);
                // Completion counts down even for cancelled units, so a
                // waiting stop still converges.
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            };
            match &self.pool {
                Some(pool) => pool.spawn(work),
                None => rayon::spawn(work),
            }
        }

        TaskHandle { shared }
    }
}

struct TaskShared {
    pending: AtomicU32,
    cancelled: AtomicBool,
}

/// Per-unit execution context handed to scheduled closures.
pub struct TaskContext {
    /// Unit index in `0..units`; CPU integrators use it as the film
    /// partition to walk.
    pub unit: u32,
    /// Pool worker index actually executing this unit.
    pub thread_id: u32,
    shared: Arc<TaskShared>,
}

impl TaskContext {
    /// True once the owning handle was cancelled; abandon remaining samples.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }
}

/// Poll-only handle to a scheduled batch. Dropping it detaches; the work
/// finishes (or cancels) on its own.
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    /// Units not yet finished.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Every unit has run to the end of its closure.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Raises the cancellation flag. Returns immediately; units observe the
    /// flag at their next check and still count down on exit.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::{Duration, Instant};

    fn poll_until_complete(handle: &TaskHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !handle.is_complete() {
            assert!(Instant::now() < deadline, "batch never completed");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_every_unit_runs_once() {
        let scheduler = TaskScheduler::with_threads(4);
        assert_eq!(scheduler.thread_count(), 4);

        let sum = Arc::new(AtomicU64::new(0));
        let handle = {
            let sum = Arc::clone(&sum);
            scheduler.schedule(32, move |ctx| {
                sum.fetch_add(ctx.unit as u64 + 1, Ordering::Relaxed);
            })
        };
        poll_until_complete(&handle);
        // 1 + 2 + ... + 32
        assert_eq!(sum.load(Ordering::Relaxed), 32 * 33 / 2);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_cancel_abandons_remaining_work() {
        let scheduler = TaskScheduler::with_threads(2);
        let done = Arc::new(AtomicU64::new(0));
        let handle = {
            let done = Arc::clone(&done);
            scheduler.schedule(8, move |ctx| {
                for _ in 0..200 {
                    if ctx.is_cancelled() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                done.fetch_add(1, Ordering::Relaxed);
            })
        };
        handle.cancel();
        // Cancelled units still count down, so completion is reachable.
        poll_until_complete(&handle);
        assert!(done.load(Ordering::Relaxed) < 8);
    }

    #[test]
    fn test_zero_units_is_complete_immediately() {
        let scheduler = TaskScheduler::new();
        let handle = scheduler.schedule(0, |_| {});
        assert!(handle.is_complete());
    }
}
