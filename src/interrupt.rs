//! The interrupt-masking collaborator and the cell type built on it.
//!
//! On the uniprocessor this crate targets, masking interrupts on the single
//! executing core is the only serialization primitive the synchronization
//! core needs: nothing else can run on this core while interrupts are
//! masked, so any state reachable only while masked is, in effect,
//! exclusively owned. [`IrqCell`] packages that discipline into a cell type;
//! [`InterruptGuard`] is the RAII handle the rest of the crate uses to mask
//! and restore interrupts around a critical section.
//!
//! `disable`/`set_level` mirror the save/restore pair real interrupt
//! controllers expose (`cli`/`popf`, or an `nested_disable`/`nested_enable`
//! free-function pair): `disable` returns whether interrupts were enabled
//! beforehand, and `set_level` restores exactly that state. Implemented this
//! way, nesting is safe for free — an inner guard's drop restores the
//! (already-disabled) level the outer guard observed, rather than blindly
//! re-enabling interrupts out from under it.

use core::cell::UnsafeCell;

use hermit_sync::OnceCell;

/// The interrupt controller collaborator.
///
/// A kernel embedding this crate implements this trait once, over its real
/// interrupt controller, and registers it with [`set_interrupt_controller`]
/// before any [`Semaphore`](crate::Semaphore), [`Lock`](crate::Lock), or
/// [`CondVar`](crate::CondVar) method can be called.
pub trait Interrupts: Send + Sync {
    /// Masks interrupts on the current core and reports whether they were
    /// enabled beforehand.
    fn disable(&self) -> bool;

    /// Restores the interrupt-enable level to `level` (`true` = enabled).
    fn set_level(&self, level: bool);

    /// Whether the calling code is running in interrupt context. The core
    /// operations in this crate assert this is `false`: none of them are
    /// safe to call from an interrupt handler.
    fn in_interrupt_context(&self) -> bool;
}

static INTERRUPTS: OnceCell<&'static dyn Interrupts> = OnceCell::new();

/// Registers the process-wide interrupt controller. Must be called exactly
/// once, before any synchronization primitive in this crate is used.
///
/// # Panics
/// Panics if a controller has already been registered.
pub fn set_interrupt_controller(controller: &'static dyn Interrupts) {
    INTERRUPTS
        .set(controller)
        .unwrap_or_else(|_| panic!("interrupt controller already registered"));
}

fn interrupts() -> &'static dyn Interrupts {
    *INTERRUPTS
        .get()
        .expect("no interrupt controller registered; call set_interrupt_controller first")
}

/// Reports whether the calling code is running in interrupt context.
#[must_use]
pub fn in_interrupt_context() -> bool {
    interrupts().in_interrupt_context()
}

/// An RAII guard that masks interrupts on construction and restores the
/// prior level on drop.
///
/// Guards nest correctly: an inner guard observes interrupts already masked
/// (so `disable` reports `false`) and its drop leaves them masked, deferring
/// the actual re-enable to whichever guard observed them enabled.
#[must_use = "interrupts stay masked only as long as the guard is alive"]
pub struct InterruptGuard {
    previous_level: bool,
}

impl InterruptGuard {
    /// Masks interrupts, remembering whether they were enabled.
    pub fn new() -> Self {
        Self {
            previous_level: interrupts().disable(),
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        interrupts().set_level(self.previous_level);
    }
}

/// A cell whose contents are accessed only while interrupts are masked.
///
/// This is the uniprocessor counterpart of a spinlock: on a single core,
/// masking interrupts already excludes every other piece of code that could
/// touch the cell, so no atomic operations or real locking are needed. An
/// SMP port would replace this with a ticket lock plus interrupt masking.
pub struct IrqCell<T> {
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever performed with interrupts masked,
// which on a uniprocessor rules out concurrent access from any other code.
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    /// Wraps `value` for interrupt-masked access.
    pub const fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
        }
    }

    /// Masks interrupts, runs `f` against the contents, then restores the
    /// prior interrupt level.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = InterruptGuard::new();
        // SAFETY: `_guard` holds interrupts masked for the call to `f`.
        f(unsafe { &mut *self.data.get() })
    }

    /// Returns a mutable reference to the contents without masking
    /// interrupts itself.
    ///
    /// # Safety
    /// The caller must hold an [`InterruptGuard`] (or otherwise guarantee
    /// interrupts are masked) for the entire lifetime of the returned
    /// reference.
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}
