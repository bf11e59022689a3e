//! A minimal, non-blocking test double for the scheduler and interrupt
//! collaborators, shared by the unit tests in each module.
//!
//! This double does not support [`Scheduler::block`] — tests that need a
//! thread to genuinely block and be woken from another thread belong in
//! `tests/scenarios.rs`, which runs against a real, OS-thread-backed
//! scheduler instead. What lives here is for exercising bookkeeping (wait
//! lists, donation math, mode flags) against a single logical thread of
//! control.

use std::cell::RefCell;
use std::sync::Once;
use std::thread_local;

use crate::interrupt::{set_interrupt_controller, Interrupts};
use crate::scheduler::{set_scheduler, Scheduler};
use crate::thread::{Priority, ThreadControlBlock, ThreadId, ThreadRef, PRI_DEFAULT};

struct TestKernel;

impl Interrupts for TestKernel {
    fn disable(&self) -> bool {
        true
    }

    fn set_level(&self, _level: bool) {}

    fn in_interrupt_context(&self) -> bool {
        false
    }
}

impl Scheduler for TestKernel {
    fn current_thread(&self) -> ThreadRef {
        CURRENT.with(|c| c.borrow().clone())
    }

    fn block(&self) {
        panic!("test harness does not support blocking; write this scenario against tests/scenarios.rs instead");
    }

    fn unblock(&self, thread: ThreadRef) {
        LAST_UNBLOCKED.with(|c| *c.borrow_mut() = Some(thread.id()));
    }

    fn yield_now(&self) {
        YIELDS.with(|c| *c.borrow_mut() += 1);
    }

    fn ready_head_priority(&self) -> Option<Priority> {
        READY_HEAD.with(|c| *c.borrow())
    }
}

static KERNEL: TestKernel = TestKernel;

thread_local! {
    static CURRENT: RefCell<ThreadRef> = RefCell::new(ThreadControlBlock::new("test-current", PRI_DEFAULT));
    static LAST_UNBLOCKED: RefCell<Option<ThreadId>> = const { RefCell::new(None) };
    static READY_HEAD: RefCell<Option<Priority>> = const { RefCell::new(None) };
    static YIELDS: RefCell<usize> = const { RefCell::new(0) };
}

static REGISTER: Once = Once::new();

/// A handle into the per-OS-thread state of the test double, returned by
/// [`test_harness`].
pub(crate) struct TestHarness;

impl TestHarness {
    /// Sets the thread this test's "current thread" calls resolve to.
    pub(crate) fn set_current(&self, thread: ThreadRef) {
        CURRENT.with(|c| *c.borrow_mut() = thread);
    }

    /// The id most recently passed to [`Scheduler::unblock`] on this test's
    /// thread, if any.
    pub(crate) fn last_unblocked(&self) -> Option<ThreadId> {
        LAST_UNBLOCKED.with(|c| *c.borrow())
    }

    /// Sets the priority [`Scheduler::ready_head_priority`] reports.
    pub(crate) fn set_ready_head_priority(&self, priority: Option<Priority>) {
        READY_HEAD.with(|c| *c.borrow_mut() = priority);
    }

    /// How many times [`Scheduler::yield_now`] has been called on this
    /// test's thread.
    pub(crate) fn yield_count(&self) -> usize {
        YIELDS.with(|c| *c.borrow())
    }
}

/// Registers the test double as the process-wide scheduler and interrupt
/// controller (once, the first time any test calls this) and resets this
/// test's thread-local recording state.
pub(crate) fn test_harness() -> TestHarness {
    REGISTER.call_once(|| {
        set_scheduler(&KERNEL);
        set_interrupt_controller(&KERNEL);
    });
    LAST_UNBLOCKED.with(|c| *c.borrow_mut() = None);
    READY_HEAD.with(|c| *c.borrow_mut() = None);
    YIELDS.with(|c| *c.borrow_mut() = 0);
    CURRENT.with(|c| *c.borrow_mut() = ThreadControlBlock::new("test-current", PRI_DEFAULT));
    TestHarness
}
