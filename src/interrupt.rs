//! Interrupt management.
//!
//! On the hardware this core was designed for, the scheduler serializes all
//! access to its state by disabling interrupts; on a single CPU that is
//! sufficient for atomicity. In this hosted rendition the scheduler state
//! lives behind one mutex, and holding the guard *is* "interrupts disabled":
//! it is acquired at every entry point and held across the context switch, so
//! the prior "interrupt level" is restored on every exit path by RAII.
//!
//! What still needs explicit modelling is external interrupt *context*: code
//! running inside the periodic tick callback must never block, and instead of
//! rescheduling directly it requests a deferred yield that takes effect when
//! the handler returns. [`IntrState`] carries both flags.

/// Interrupt-context bookkeeping, part of the scheduler state.
#[derive(Debug, Default)]
pub(crate) struct IntrState {
    /// True while the tick callback is running. Operations that may suspend
    /// the caller assert this is false.
    pub(crate) in_handler: bool,
    /// Set inside the handler to request a yield at the next safe preemption
    /// point, i.e. right after the handler body finishes.
    pub(crate) yield_on_return: bool,
}

impl crate::Kernel {
    /// Returns true if the calling code runs inside the tick handler.
    pub fn intr_context(&self) -> bool {
        self.sched().intr.in_handler
    }
}
