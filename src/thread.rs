//! The thread handle and priority types the synchronization core consumes.
//!
//! The thread descriptor itself — its stack, its ready-queue linkage, its
//! scheduling class — belongs entirely to the embedding kernel. This module
//! only defines the narrow slice of a thread's state that donation and
//! wait-queue ordering need to read and mutate: an identity, a priority pair
//! (effective and original), the lock it is blocked on (if any) together with
//! that lock's holder at the moment it started waiting, and the set of
//! threads currently donating to it.
//!
//! [`ThreadControlBlock`] is a ready-to-use implementation of [`Thread`] for
//! callers that don't already have their own thread struct to adapt; it
//! protects its fields with the same [`IrqCell`](crate::interrupt::IrqCell)
//! discipline the rest of this crate uses.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::interrupt::IrqCell;
use crate::lock::LockId;

/// Lowest priority a thread may hold, matching the scheduler's idle class.
pub const PRI_MIN: Priority = Priority::new(0);
/// The priority newly created threads start at absent other instruction.
pub const PRI_DEFAULT: Priority = Priority::new(31);
/// Highest priority a thread may hold or be donated to.
pub const PRI_MAX: Priority = Priority::new(63);

/// A process-wide unique thread identity.
///
/// Ordering has no scheduling meaning; it exists only so threads can be kept
/// in sets and compared for equality cheaply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Allocates a new, never-before-seen thread identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// A scheduling priority, 0 (lowest) through 63 (highest).
///
/// Higher values run first. The donation walk only ever raises a thread's
/// effective priority; it is [`Lock::release`](crate::lock::Lock::release)
/// that recomputes and potentially lowers it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    /// Builds a priority from a raw value. Callers are expected to stay
    /// within [`PRI_MIN`]..=[`PRI_MAX`]; nothing here enforces that range,
    /// since the scheduler collaborator is free to use a wider class space.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw priority value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// A shared handle to a thread, as seen by the synchronization core.
///
/// Implementors must make every method safe to call from any thread at any
/// time, including concurrently with calls for the same [`Thread`] from a
/// different thread of control — the donation walk reaches across threads by
/// design.
pub trait Thread: Send + Sync {
    /// This thread's identity.
    fn id(&self) -> ThreadId;

    /// The priority the thread currently runs at, after any donation.
    fn priority(&self) -> Priority;

    /// Overwrites the effective priority. Used both by donation (raising it)
    /// and by [`Lock::release`](crate::lock::Lock::release) (restoring it).
    fn set_priority(&self, priority: Priority);

    /// The priority the thread would run at absent any donation.
    fn original_priority(&self) -> Priority;

    /// Records a new base priority, e.g. in response to an explicit
    /// priority-change request from the owning kernel.
    fn set_original_priority(&self, priority: Priority);

    /// The lock this thread is currently blocked acquiring, if any, paired
    /// with a handle to that lock's holder at the moment blocking began.
    ///
    /// The pairing exists so the donation walk never has to dereference a
    /// `Lock` by address: a lock's holder cannot change while some other
    /// thread is recorded as waiting on it, so capturing it once at the
    /// start of the wait is equivalent to, and cheaper than, looking it up
    /// afresh at each hop.
    fn wait_edge(&self) -> Option<(LockId, ThreadRef)>;

    /// Sets or clears the wait edge described by [`Thread::wait_edge`].
    fn set_wait_edge(&self, edge: Option<(LockId, ThreadRef)>);

    /// The lock this thread is blocked acquiring, if any.
    fn wait_on_lock(&self) -> Option<LockId> {
        self.wait_edge().map(|(lock, _holder)| lock)
    }

    /// Registers `donor` as currently donating its priority to this thread.
    /// A thread that already appears in the donor set is left untouched.
    fn add_donor(&self, donor: ThreadRef);

    /// Drops every donor currently waiting on `lock` from this thread's
    /// donor set, called when this thread releases that lock.
    fn remove_donors_waiting_on(&self, lock: LockId);

    /// The highest priority among this thread's current donors, or `None`
    /// if nobody is donating to it.
    fn max_donor_priority(&self) -> Option<Priority>;

    /// The identities of this thread's current donors, for diagnostics and
    /// tests.
    fn donor_ids(&self) -> SmallVec<[ThreadId; 4]>;
}

/// A reference-counted handle to anything implementing [`Thread`].
///
/// Cloning a `ThreadRef` is cheap (it bumps a refcount) and is how the
/// donation graph is built: a lock's holder, and a thread's donor set, are
/// both made of these.
pub type ThreadRef = Arc<dyn Thread>;

struct Inner {
    priority: Priority,
    original_priority: Priority,
    wait_edge: Option<(LockId, ThreadRef)>,
    donations: SmallVec<[ThreadRef; 4]>,
}

/// A ready-to-use [`Thread`] implementation.
///
/// Embedding kernels that already track their own thread struct will
/// normally implement [`Thread`] directly on it instead; `ThreadControlBlock`
/// is here so the crate (and its tests) has a concrete type to hand to
/// [`Scheduler`](crate::scheduler::Scheduler) implementations without
/// depending on any particular kernel's task type.
pub struct ThreadControlBlock {
    id: ThreadId,
    name: &'static str,
    inner: IrqCell<Inner>,
}

impl ThreadControlBlock {
    /// Creates a new thread control block at `priority`, with a freshly
    /// allocated identity, and wraps it ready to hand to a scheduler.
    #[must_use]
    pub fn new(name: &'static str, priority: Priority) -> Arc<Self> {
        Arc::new(Self {
            id: ThreadId::next(),
            name,
            inner: IrqCell::new(Inner {
                priority,
                original_priority: priority,
                wait_edge: None,
                donations: SmallVec::new(),
            }),
        })
    }

    /// The human-readable name this block was created with, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ThreadControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControlBlock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority())
            .finish()
    }
}

impl Thread for ThreadControlBlock {
    fn id(&self) -> ThreadId {
        self.id
    }

    fn priority(&self) -> Priority {
        self.inner.with(|inner| inner.priority)
    }

    fn set_priority(&self, priority: Priority) {
        self.inner.with(|inner| inner.priority = priority);
    }

    fn original_priority(&self) -> Priority {
        self.inner.with(|inner| inner.original_priority)
    }

    fn set_original_priority(&self, priority: Priority) {
        self.inner.with(|inner| inner.original_priority = priority);
    }

    fn wait_edge(&self) -> Option<(LockId, ThreadRef)> {
        self.inner.with(|inner| inner.wait_edge.clone())
    }

    fn set_wait_edge(&self, edge: Option<(LockId, ThreadRef)>) {
        self.inner.with(|inner| inner.wait_edge = edge);
    }

    fn add_donor(&self, donor: ThreadRef) {
        self.inner.with(|inner| {
            if !inner.donations.iter().any(|d| d.id() == donor.id()) {
                inner.donations.push(donor);
            }
        });
    }

    fn remove_donors_waiting_on(&self, lock: LockId) {
        self.inner
            .with(|inner| inner.donations.retain(|d| d.wait_on_lock() != Some(lock)));
    }

    fn max_donor_priority(&self) -> Option<Priority> {
        self.inner
            .with(|inner| inner.donations.iter().map(|d| d.priority()).max())
    }

    fn donor_ids(&self) -> SmallVec<[ThreadId; 4]> {
        self.inner
            .with(|inner| inner.donations.iter().map(|d| d.id()).collect())
    }
}
