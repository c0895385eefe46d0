//! The execution-transfer primitive.
//!
//! Everything below the scheduler's "switch to this thread" decision is
//! platform plumbing: save the old register state, restore the new one. This
//! module is that platform layer for the hosted kernel. Each kernel thread is
//! carried by a host thread that owns a [`Parker`]; the thread record keeps
//! the matching [`Unparker`] as a [`SwitchHandle`]. Waking the handle and then
//! parking the caller transfers execution, with the contract that [`park`]
//! returns only once this thread has been made current again.
//!
//! The parker's token makes the hand-off race-free: at most one outstanding
//! wake can target a thread (a thread is selected at most once while it is
//! off-CPU), and a wake delivered before the corresponding park is not lost.

use crossbeam_utils::sync::{Parker, Unparker};
use std::cell::RefCell;

thread_local! {
    static PARKER: RefCell<Option<Parker>> = const { RefCell::new(None) };
}

/// Binds the calling host thread to its parker. Must be called exactly once
/// per host thread before it first parks.
pub(crate) fn install(parker: Parker) {
    PARKER.with(|slot| *slot.borrow_mut() = Some(parker));
}

/// Suspends the calling host thread until its [`SwitchHandle`] is woken.
pub(crate) fn park() {
    PARKER.with(|slot| {
        let slot = slot.borrow();
        slot.as_ref()
            .expect("host thread is not bound to a kernel thread")
            .park();
    });
}

/// The waker half of a thread's execution context, stored in its record.
#[derive(Clone)]
pub(crate) struct SwitchHandle {
    unparker: Unparker,
}

impl SwitchHandle {
    pub(crate) fn new(unparker: Unparker) -> Self {
        Self { unparker }
    }

    /// Resumes the owning thread. Call only after making it current.
    pub(crate) fn wake(&self) {
        self.unparker.unpark();
    }
}
