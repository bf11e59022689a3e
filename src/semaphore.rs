//! A counting semaphore with a priority-ordered wait list.

use crate::interrupt::{in_interrupt_context, IrqCell};
use crate::scheduler::{scheduler, yield_to_higher_priority};
use crate::wait_queue::WaitQueue;

struct State {
    value: u32,
    waiters: WaitQueue,
}

/// A counting semaphore.
///
/// `down` blocks while the value is zero; `up` increments it and wakes the
/// highest-priority waiter, if any. [`Lock`](crate::Lock) is built directly
/// on a semaphore initialized to one.
pub struct Semaphore {
    state: IrqCell<State>,
}

impl Semaphore {
    /// Creates a semaphore with the given initial value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            state: IrqCell::new(State {
                value,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// The current value, for diagnostics. Racy the instant it's read unless
    /// the caller holds interrupts masked itself; never use it to decide
    /// whether a subsequent `down` would block.
    pub fn value(&self) -> u32 {
        self.state.with(|s| s.value)
    }

    /// Decrements the value without blocking if it is positive, returning
    /// whether it did so.
    pub fn try_down(&self) -> bool {
        self.state.with(|s| {
            if s.value > 0 {
                s.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Waits for the value to be positive, then atomically decrements it.
    ///
    /// # Panics
    /// Panics if called from interrupt context.
    pub fn down(&self) {
        crate::check(
            !in_interrupt_context(),
            "Semaphore::down called from interrupt context",
        );

        // Held across the whole loop, including the call to `block`: the
        // scheduler is responsible for restoring this same masked level when
        // it resumes us, so the wait-list insertion and the wait itself form
        // one atomic step from `up`'s point of view. See `IrqCell::with`,
        // which cannot be used here because it releases interrupts between
        // iterations.
        let guard = crate::interrupt::InterruptGuard::new();
        loop {
            // SAFETY: `guard` holds interrupts masked for the whole loop body.
            let state = unsafe { self.state.get_mut_unchecked() };
            if state.value > 0 {
                state.value -= 1;
                break;
            }
            let current = scheduler().current_thread();
            log::trace!("thread {} blocking on semaphore", current.id());
            state.waiters.insert_ordered(current);
            scheduler().block();
            log::trace!("thread {} woke from semaphore wait", scheduler().current_thread().id());
        }
        drop(guard);
    }

    /// Increments the value and wakes the highest-priority waiter, if any.
    ///
    /// Yields the current thread immediately if doing so wakes a
    /// higher-priority thread than the one currently running.
    pub fn up(&self) {
        // Resort, pop, unblock, and increment all happen under the same
        // masked section, matching `down`'s one-guard-per-step discipline:
        // the waiter must be moved to runnable before interrupts are
        // restored, not after.
        self.state.with(|s| {
            s.waiters.resort();
            let woken = s.waiters.pop_front();
            s.value += 1;
            if let Some(thread) = woken {
                log::trace!("waking thread {} from semaphore wait", thread.id());
                scheduler().unblock(thread);
            }
        });
        yield_to_higher_priority();
    }
}
