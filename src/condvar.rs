//! A Mesa-style condition variable.
//!
//! `wait` atomically releases the caller's lock and blocks; `signal` wakes
//! the single highest-priority waiter, if any; `broadcast` wakes all of
//! them. Mesa semantics mean a woken waiter only gets another chance to run
//! — it must re-acquire the lock and re-check whatever condition it was
//! waiting for itself, since nothing stops a third thread from invalidating
//! that condition again before the waiter actually resumes.
//!
//! Unlike [`Semaphore`]'s wait list, a condition variable's waiters are not
//! the blocked threads themselves but anonymous per-wait records, each
//! holding its own single-use binary semaphore — the thing `signal` actually
//! posts to. Each record's priority is captured once, when the wait begins;
//! unlike a lock's donation graph, nothing here keeps that snapshot in sync
//! with subsequent priority changes, so two waiters of initially-equal
//! priority keep their relative order even if one is later donated to. This
//! is a known, deliberate simplification rather than a bug.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::interrupt::{in_interrupt_context, IrqCell};
use crate::lock::Lock;
use crate::scheduler::scheduler;
use crate::semaphore::Semaphore;
use crate::thread::Priority;

struct Waiter {
    priority: Priority,
    semaphore: Arc<Semaphore>,
}

/// A Mesa-style condition variable, always used together with a specific
/// [`Lock`] that the caller must hold across every operation.
pub struct CondVar {
    waiters: IrqCell<Vec<Waiter>>,
}

impl CondVar {
    /// Creates a condition variable with no waiters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: IrqCell::new(Vec::new()),
        }
    }

    /// Releases `lock`, blocks until woken by [`CondVar::signal`] or
    /// [`CondVar::broadcast`], then re-acquires `lock` before returning.
    ///
    /// Because this is Mesa-style, a thread that wakes from `wait` has only
    /// been given a chance to re-check its condition, not a guarantee that
    /// it still holds — always call `wait` in a loop around the condition.
    ///
    /// # Panics
    /// Panics if called from interrupt context, or if `lock` is not held by
    /// the calling thread.
    pub fn wait(&self, lock: &Lock) {
        crate::check(
            !in_interrupt_context(),
            "CondVar::wait called from interrupt context",
        );
        crate::check(
            lock.held_by_current(),
            "CondVar::wait: lock is not held by the calling thread",
        );

        let semaphore = Arc::new(Semaphore::new(0));
        let current = scheduler().current_thread();
        let priority = current.priority();
        self.waiters.with(|w| {
            let pos = w.partition_point(|waiter| waiter.priority >= priority);
            w.insert(
                pos,
                Waiter {
                    priority,
                    semaphore: semaphore.clone(),
                },
            );
        });

        log::trace!("thread {} waiting on condition variable", current.id());
        lock.release();
        semaphore.down();
        lock.acquire();
    }

    /// Wakes the single highest-priority waiter, if any.
    ///
    /// # Panics
    /// Panics if called from interrupt context, or if `lock` is not held by
    /// the calling thread.
    pub fn signal(&self, lock: &Lock) {
        crate::check(
            !in_interrupt_context(),
            "CondVar::signal called from interrupt context",
        );
        crate::check(
            lock.held_by_current(),
            "CondVar::signal: lock is not held by the calling thread",
        );

        let woken = self
            .waiters
            .with(|w| if w.is_empty() { None } else { Some(w.remove(0)) });
        if let Some(waiter) = woken {
            log::trace!("waking condition variable waiter at priority {:?}", waiter.priority);
            waiter.semaphore.up();
        }
    }

    /// Wakes every current waiter.
    ///
    /// # Panics
    /// Panics if called from interrupt context, or if `lock` is not held by
    /// the calling thread.
    pub fn broadcast(&self, lock: &Lock) {
        crate::check(
            !in_interrupt_context(),
            "CondVar::broadcast called from interrupt context",
        );
        crate::check(
            lock.held_by_current(),
            "CondVar::broadcast: lock is not held by the calling thread",
        );

        while self.waiters.with(|w| !w.is_empty()) {
            self.signal(lock);
        }
    }

    /// Whether any thread is currently waiting on this condition variable.
    pub fn has_waiters(&self) -> bool {
        self.waiters.with(|w| !w.is_empty())
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::test_harness;
    use crate::thread::{Priority, ThreadControlBlock, PRI_DEFAULT};

    #[test]
    fn signal_with_no_waiters_is_a_no_op() {
        let h = test_harness();
        let lock = Lock::new();
        let me = ThreadControlBlock::new("me", PRI_DEFAULT);
        h.set_current(me);
        lock.try_acquire();

        let cv = CondVar::new();
        cv.signal(&lock);
        assert!(!cv.has_waiters());
    }

    #[test]
    fn broadcast_drains_every_waiter_record() {
        let h = test_harness();
        let lock = Lock::new();
        let me = ThreadControlBlock::new("me", PRI_DEFAULT);
        h.set_current(me);
        lock.try_acquire();

        let cv = CondVar::new();
        // Insert waiter records directly, the way `wait` would, without
        // actually blocking this test thread.
        cv.waiters.with(|w| {
            w.push(Waiter {
                priority: Priority::new(10),
                semaphore: Arc::new(Semaphore::new(0)),
            });
            w.push(Waiter {
                priority: Priority::new(20),
                semaphore: Arc::new(Semaphore::new(0)),
            });
        });

        cv.broadcast(&lock);
        assert!(!cv.has_waiters());
    }

    #[test]
    fn signal_wakes_the_highest_priority_waiter_first() {
        let h = test_harness();
        let lock = Lock::new();
        let me = ThreadControlBlock::new("me", PRI_DEFAULT);
        h.set_current(me);
        lock.try_acquire();

        let cv = CondVar::new();
        let low_sem = Arc::new(Semaphore::new(0));
        let high_sem = Arc::new(Semaphore::new(0));
        cv.waiters.with(|w| {
            let pos = w.partition_point(|waiter| waiter.priority >= Priority::new(10));
            w.insert(
                pos,
                Waiter {
                    priority: Priority::new(10),
                    semaphore: low_sem.clone(),
                },
            );
            let pos = w.partition_point(|waiter| waiter.priority >= Priority::new(90));
            w.insert(
                pos,
                Waiter {
                    priority: Priority::new(90),
                    semaphore: high_sem.clone(),
                },
            );
        });

        cv.signal(&lock);
        assert_eq!(high_sem.value(), 1);
        assert_eq!(low_sem.value(), 0);
    }
}
