//! A mutual-exclusion lock with priority donation.
//!
//! Built directly on a [`Semaphore`] initialized to one: `Lock` adds a
//! holder field and, when donation is enabled, walks the chain of locks a
//! blocked thread is waiting behind, raising each holder's effective
//! priority to match so a low-priority holder can't be starved by
//! medium-priority threads while a high-priority thread waits on it.

use crate::interrupt::in_interrupt_context;
use crate::mode::donation_enabled;
use crate::scheduler::scheduler;
use crate::semaphore::Semaphore;
use crate::thread::ThreadRef;

/// The identity of a [`Lock`], derived from its address.
///
/// Used only to compare "is this the lock I'm recorded as waiting on"
/// without requiring a reference back to the `Lock` itself; see
/// [`Thread::wait_edge`](crate::Thread::wait_edge) for why that reference
/// isn't needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockId(usize);

impl LockId {
    #[cfg(test)]
    pub(crate) const fn from_raw(value: usize) -> Self {
        Self(value)
    }
}

/// A mutual-exclusion lock.
///
/// A thread that already holds the lock must not call
/// [`Lock::acquire`] or [`Lock::try_acquire`] again: this lock is not
/// reentrant.
pub struct Lock {
    holder: crate::interrupt::IrqCell<Option<ThreadRef>>,
    semaphore: Semaphore,
}

impl Lock {
    /// Creates an unheld lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            holder: crate::interrupt::IrqCell::new(None),
            semaphore: Semaphore::new(1),
        }
    }

    fn id(&self) -> LockId {
        LockId(core::ptr::from_ref(self) as usize)
    }

    /// Whether the lock is currently held by the calling thread.
    pub fn held_by_current(&self) -> bool {
        let current = scheduler().current_thread();
        self.holder
            .with(|h| h.as_ref().is_some_and(|holder| holder.id() == current.id()))
    }

    /// Acquires the lock without blocking if it is free, returning whether
    /// it did so.
    ///
    /// # Panics
    /// Panics if the calling thread already holds this lock.
    pub fn try_acquire(&self) -> bool {
        crate::check(
            !self.held_by_current(),
            "Lock::try_acquire: already held by the calling thread",
        );
        if self.semaphore.try_down() {
            let current = scheduler().current_thread();
            self.holder.with(|h| *h = Some(current));
            true
        } else {
            false
        }
    }

    /// Acquires the lock, blocking until it is free.
    ///
    /// When donation is enabled and the lock is currently held, this donates
    /// the calling thread's priority to the holder, and transitively to
    /// whatever that holder is itself waiting behind, before blocking.
    ///
    /// # Panics
    /// Panics if called from interrupt context, or if the calling thread
    /// already holds this lock.
    pub fn acquire(&self) {
        crate::check(
            !in_interrupt_context(),
            "Lock::acquire called from interrupt context",
        );
        crate::check(
            !self.held_by_current(),
            "Lock::acquire: already held by the calling thread",
        );

        let current = scheduler().current_thread();
        {
            // One guard across the read-holder / record-wait-edge /
            // add-donor / donate-priority sequence: each step individually
            // masks interrupts through its own `IrqCell`, but a second
            // donation chain landing on the same holder between two of those
            // steps could otherwise clobber a concurrently-donated priority.
            // Held here, every nested `with()` below just observes interrupts
            // already masked and is a no-op on drop.
            let _guard = crate::interrupt::InterruptGuard::new();
            let current_holder = self.holder.with(|h| h.clone());
            if let Some(holder) = current_holder {
                current.set_wait_edge(Some((self.id(), holder.clone())));
                if donation_enabled() {
                    log::debug!(
                        "thread {} donating priority {:?} to holder {}",
                        current.id(),
                        current.priority(),
                        holder.id()
                    );
                    holder.add_donor(current.clone());
                    donate_priority(&current);
                }
            }
        }

        self.semaphore.down();

        current.set_wait_edge(None);
        self.holder.with(|h| *h = Some(current));
    }

    /// Releases the lock.
    ///
    /// When donation is enabled, first drops every donor that was waiting on
    /// this specific lock and recomputes the releasing thread's effective
    /// priority from its original priority and whatever donations remain
    /// from other, still-held locks.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold this lock.
    pub fn release(&self) {
        crate::check(
            self.held_by_current(),
            "Lock::release: not held by the calling thread",
        );
        let current = scheduler().current_thread();

        if donation_enabled() {
            // One guard across remove-donors / recompute / set-priority: a
            // donor arriving between those steps must see either the whole
            // recomputation or none of it, never a partial update.
            let _guard = crate::interrupt::InterruptGuard::new();
            let lock_id = self.id();
            current.remove_donors_waiting_on(lock_id);
            let restored = current
                .max_donor_priority()
                .map_or(current.original_priority(), |donor| {
                    donor.max(current.original_priority())
                });
            log::debug!(
                "thread {} priority {:?} -> {:?} after releasing lock",
                current.id(),
                current.priority(),
                restored
            );
            current.set_priority(restored);
        }

        self.holder.with(|h| *h = None);
        self.semaphore.up();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the chain of locks `start` is now waiting behind, raising each
/// holder's effective priority to `start`'s if it is lower, and stops as
/// soon as a hop finds a holder already at or above that priority.
///
/// The walk reads each hop's holder from the donor's own recorded wait edge
/// rather than re-deriving it from a `Lock`, since that holder cannot change
/// while the donor remains recorded as waiting (see
/// [`Thread::wait_edge`](crate::Thread::wait_edge)).
///
/// Holds one `InterruptGuard` across every hop: each `priority()` read and
/// `set_priority()` write below is individually masked through the holder's
/// own `IrqCell`, but without a single guard spanning the whole walk, a
/// second donation chain could land on the same holder between one hop's
/// read and its write and have its update overwritten by a now-stale one.
fn donate_priority(start: &ThreadRef) {
    let _guard = crate::interrupt::InterruptGuard::new();
    let mut donor = start.clone();
    loop {
        let Some((_, holder)) = donor.wait_edge() else {
            break;
        };
        if holder.priority() >= donor.priority() {
            break;
        }
        log::debug!(
            "priority donation raises thread {} to {:?}",
            holder.id(),
            donor.priority()
        );
        holder.set_priority(donor.priority());
        donor = holder;
    }
}
