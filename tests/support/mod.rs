//! Shared support for the end-to-end scenario tests: a scheduler and
//! interrupt controller backed by real OS threads, standing in for the
//! kernel's own ready queue and interrupt gate.
//!
//! "Masking interrupts" here is realized as a reentrant, ownership-tracked
//! gate. Unlike a depth counter, ownership is tracked as a single
//! "unowned or owned by thread X" flag: a nested `disable()` call on the
//! thread that already owns the gate is a no-op that reports the interrupts
//! were already off, and its matching `set_level(false)` is in turn a no-op,
//! exactly mirroring how a single hardware interrupt flag behaves under
//! properly nested disable/restore pairs — only the outermost pair that
//! actually flips the flag does any real work. This is what lets
//! [`MockKernel::block`] fully release the gate around a real
//! `std::thread::park` (letting some other OS thread make progress) and
//! reacquire it before returning.

use std::collections::HashMap;
use std::sync::{Condvar, LazyLock, Mutex};
use std::thread::ThreadId as OsThreadId;

use kernel_synch::thread::{Priority, ThreadControlBlock, ThreadId};
use kernel_synch::{Interrupts, Scheduler, ThreadRef};

struct ReentrantGate {
    owner: Mutex<Option<OsThreadId>>,
    idle: Condvar,
}

impl ReentrantGate {
    const fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            idle: Condvar::new(),
        }
    }

    /// Masks, returning the previous level (`true` = was enabled).
    fn disable(&self) -> bool {
        let me = std::thread::current().id();
        let mut guard = self.owner.lock().unwrap();
        loop {
            match *guard {
                Some(owner) if owner == me => return false,
                None => {
                    *guard = Some(me);
                    return true;
                }
                Some(_) => guard = self.idle.wait(guard).unwrap(),
            }
        }
    }

    /// Restores the level a matching `disable()` observed. A `false` here
    /// (restoring to "already disabled") is always a no-op; only a `true`
    /// (the call that actually flipped it) releases the gate.
    fn set_level(&self, level: bool) {
        if !level {
            return;
        }
        let me = std::thread::current().id();
        let mut guard = self.owner.lock().unwrap();
        assert_eq!(*guard, Some(me), "interrupt level restored from the wrong thread");
        *guard = None;
        self.idle.notify_all();
    }

    /// Fully releases the gate for use around a real block, regardless of
    /// how many nested `disable()` calls are logically outstanding on this
    /// thread — `block()` is only ever called from the single top-level
    /// guard a thread holds while waiting, never from inside a nested one.
    fn release_for_block(&self) {
        let me = std::thread::current().id();
        let mut guard = self.owner.lock().unwrap();
        assert_eq!(*guard, Some(me), "block() called without interrupts masked");
        *guard = None;
        self.idle.notify_all();
    }

    fn reacquire(&self) {
        let me = std::thread::current().id();
        let mut guard = self.owner.lock().unwrap();
        loop {
            match *guard {
                None => {
                    *guard = Some(me);
                    return;
                }
                Some(_) => guard = self.idle.wait(guard).unwrap(),
            }
        }
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<ThreadRef>> = const { std::cell::RefCell::new(None) };
}

struct Registry {
    handles: HashMap<ThreadId, std::thread::Thread>,
    runnable: Vec<ThreadRef>,
}

pub struct MockKernel {
    gate: ReentrantGate,
    registry: Mutex<Registry>,
}

impl MockKernel {
    fn new() -> Self {
        Self {
            gate: ReentrantGate::new(),
            registry: Mutex::new(Registry {
                handles: HashMap::new(),
                runnable: Vec::new(),
            }),
        }
    }

    fn note_runnable(&self, thread: ThreadRef) {
        let mut reg = self.registry.lock().unwrap();
        if !reg.runnable.iter().any(|t| t.id() == thread.id()) {
            reg.runnable.push(thread);
        }
    }

    fn note_not_runnable(&self, id: ThreadId) {
        let mut reg = self.registry.lock().unwrap();
        reg.runnable.retain(|t| t.id() != id);
    }
}

impl Interrupts for MockKernel {
    fn disable(&self) -> bool {
        self.gate.disable()
    }

    fn set_level(&self, level: bool) {
        self.gate.set_level(level);
    }

    fn in_interrupt_context(&self) -> bool {
        false
    }
}

impl Scheduler for MockKernel {
    fn current_thread(&self) -> ThreadRef {
        CURRENT.with(|c| {
            c.borrow()
                .clone()
                .expect("current thread not registered; spawn it via support::spawn")
        })
    }

    fn block(&self) {
        let current = self.current_thread();
        self.note_not_runnable(current.id());
        self.gate.release_for_block();
        std::thread::park();
        self.gate.reacquire();
        self.note_runnable(current);
    }

    fn unblock(&self, thread: ThreadRef) {
        self.note_runnable(thread.clone());
        let reg = self.registry.lock().unwrap();
        if let Some(handle) = reg.handles.get(&thread.id()) {
            handle.unpark();
        }
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn ready_head_priority(&self) -> Option<Priority> {
        let current = self.current_thread();
        let reg = self.registry.lock().unwrap();
        reg.runnable
            .iter()
            .filter(|t| t.id() != current.id())
            .map(|t| t.priority())
            .max()
    }
}

// SAFETY: every field is itself `Sync`; `MockKernel` only coordinates shared
// state through them.
unsafe impl Sync for MockKernel {}

/// The single process-wide test kernel. Scenario tests that run concurrently
/// must serialize through [`serial`] since they all share this instance.
pub static KERNEL: LazyLock<MockKernel> = LazyLock::new(MockKernel::new);

static REGISTER: std::sync::Once = std::sync::Once::new();
static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Acquires the process-wide serialization lock for a scenario test, and
/// makes sure the mock kernel is registered as `kernel_synch`'s process-wide
/// scheduler and interrupt controller.
pub fn serial() -> std::sync::MutexGuard<'static, ()> {
    REGISTER.call_once(|| {
        kernel_synch::scheduler::set_scheduler(&*KERNEL);
        kernel_synch::interrupt::set_interrupt_controller(&*KERNEL);
    });
    match TEST_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Gives the calling OS thread (typically the test function's own thread) an
/// identity the mock kernel recognizes as `current_thread()`, without
/// spawning a new OS thread for it.
pub fn register_current(name: &'static str, priority: Priority) -> ThreadRef {
    let tcb: ThreadRef = ThreadControlBlock::new(name, priority);
    CURRENT.with(|c| *c.borrow_mut() = Some(tcb.clone()));
    KERNEL.note_runnable(tcb.clone());
    KERNEL
        .registry
        .lock()
        .unwrap()
        .handles
        .insert(tcb.id(), std::thread::current());
    tcb
}

/// Spawns a real OS thread standing in for a kernel thread at `priority`,
/// registers it with the mock kernel, and runs `body` on it with
/// `current_thread()` resolving to it.
pub fn spawn(
    name: &'static str,
    priority: Priority,
    body: impl FnOnce() + Send + 'static,
) -> std::thread::JoinHandle<()> {
    let tcb: ThreadRef = ThreadControlBlock::new(name, priority);
    let id = tcb.id();
    let handle = std::thread::Builder::new()
        .name(name.into())
        .spawn({
            let tcb = tcb.clone();
            move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(tcb.clone()));
                KERNEL.note_runnable(tcb);
                body();
            }
        })
        .expect("failed to spawn test thread");
    KERNEL
        .registry
        .lock()
        .unwrap()
        .handles
        .insert(id, handle.thread().clone());
    handle
}
