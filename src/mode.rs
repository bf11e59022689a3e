//! The donation-mode flag.
//!
//! Whether [`Lock`](crate::Lock) performs priority donation at all is a
//! single process-wide switch: the `mlfqs` Cargo feature picks
//! the boot-time default, but a kernel that decides at runtime which
//! scheduling policy is active (e.g. from a boot argument, the way Pintos
//! reads `-mlfqs` off its command line) can flip it with
//! [`set_donation_enabled`] before any thread contends on a lock.
//!
//! When disabled, [`Lock`](crate::Lock) still serializes correctly — it is
//! still a binary semaphore — it just never walks or mutates the donation
//! graph, matching a scheduler (such as an MLFQS) that manages thread
//! priorities on its own and would have any donation bookkeeping clobbered
//! or ignored anyway.

use core::sync::atomic::{AtomicBool, Ordering};

static DONATION_ENABLED: AtomicBool = AtomicBool::new(!cfg!(feature = "mlfqs"));

/// Whether [`Lock`](crate::Lock) currently performs priority donation.
#[must_use]
pub fn donation_enabled() -> bool {
    DONATION_ENABLED.load(Ordering::Relaxed)
}

/// Switches priority donation on or off for every [`Lock`](crate::Lock) in
/// the process.
///
/// Intended to be called once, early at boot, before any thread contends on
/// a lock; flipping it while locks are contended leaves in-flight donations
/// exactly as they were, since the flag is only consulted at the start of
/// [`Lock::acquire`](crate::Lock::acquire) and
/// [`Lock::release`](crate::Lock::release).
pub fn set_donation_enabled(enabled: bool) {
    DONATION_ENABLED.store(enabled, Ordering::Relaxed);
}
