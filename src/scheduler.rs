//! The scheduler collaborator: everything this crate needs from the ready
//! queue, without owning any of it.
//!
//! The synchronization core never decides who runs next; it only asks the
//! scheduler to block the current thread, wake a specific thread up, step
//! aside for a higher-priority one, or report who is currently running. A
//! kernel implements [`Scheduler`] once, over its real ready queue and
//! context-switch machinery, and registers it with [`set_scheduler`] before
//! touching any [`Semaphore`](crate::Semaphore), [`Lock`](crate::Lock), or
//! [`CondVar`](crate::CondVar).

use hermit_sync::OnceCell;

use crate::thread::{Priority, ThreadRef};

/// The scheduler collaborator.
///
/// `block` and `unblock` are the only two operations that move a thread
/// between "runnable" and "waiting" from this crate's point of view; every
/// other detail of how the ready queue is organized is the implementor's
/// business.
pub trait Scheduler: Send + Sync {
    /// A handle to the thread currently executing on this core.
    fn current_thread(&self) -> ThreadRef;

    /// Suspends the current thread until some other code calls
    /// [`Scheduler::unblock`] on it.
    ///
    /// Called with interrupts masked; the scheduler is responsible for
    /// restoring the interrupt-enable level of whichever thread it switches
    /// to, and for leaving interrupts masked again on this thread by the time
    /// this call returns here.
    fn block(&self);

    /// Makes `thread` runnable again. Does not itself cause a context
    /// switch; callers that need to yield in response do so explicitly via
    /// [`Scheduler::yield_now`].
    fn unblock(&self, thread: ThreadRef);

    /// Voluntarily gives up the current core, re-entering the ready queue
    /// at the current thread's priority.
    fn yield_now(&self);

    /// The priority of the highest-priority runnable thread other than the
    /// one currently executing, if any is runnable. Used to decide whether
    /// waking a thread should pre-empt the caller immediately.
    fn ready_head_priority(&self) -> Option<Priority>;
}

static SCHEDULER: OnceCell<&'static dyn Scheduler> = OnceCell::new();

/// Registers the process-wide scheduler. Must be called exactly once,
/// before any synchronization primitive in this crate is used.
///
/// # Panics
/// Panics if a scheduler has already been registered.
pub fn set_scheduler(sched: &'static dyn Scheduler) {
    SCHEDULER
        .set(sched)
        .unwrap_or_else(|_| panic!("scheduler already registered"));
}

/// The process-wide scheduler collaborator.
///
/// # Panics
/// Panics if no scheduler has been registered yet.
pub fn scheduler() -> &'static dyn Scheduler {
    *SCHEDULER
        .get()
        .expect("no scheduler registered; call set_scheduler first")
}

/// Yields the current core if a higher-priority thread than the one running
/// is now runnable. Shared by every operation in this crate that wakes a
/// waiter and must give it a chance to preempt immediately.
pub(crate) fn yield_to_higher_priority() {
    if crate::interrupt::in_interrupt_context() {
        return;
    }
    let sched = scheduler();
    if let Some(head) = sched.ready_head_priority() {
        if head > sched.current_thread().priority() {
            sched.yield_now();
        }
    }
}
