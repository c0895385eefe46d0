//! Thread exit and parent/child wait coordination.
//!
//! Every spawned thread gets an exit slot at creation: an exit status plus a
//! semaphore the parent downs to wait for the child. The slot deliberately
//! outlives the thread record, so the parent can still collect a status after
//! the child has been reclaimed, and the wait works no matter which side gets
//! there first.
//!
//! A child can be waited on exactly once, and only by its parent: the child
//! is struck from the parent's child list before the parent blocks, so a
//! second wait (or a wait by anyone else) fails with
//! [`KernelError::NoSuchEntry`]. A parent that exits without waiting orphans
//! its children; nobody inherits them, and their exit slots are simply never
//! collected.

use crate::sync::semaphore::{self, SemaId};
use crate::thread::scheduler::Sched;
use crate::thread::{ThreadState, Tid};
use crate::{Kernel, KernelError};

/// Unwind payload used by [`Kernel::exit`] to leave the thread body. Caught
/// at the root of every spawned thread; never observed by user code.
pub(crate) struct ExitToken;

/// Per-thread exit status and the semaphore a waiting parent blocks on.
pub(crate) struct ExitSlot {
    pub(crate) status: i32,
    pub(crate) sema: SemaId,
}

impl Sched {
    pub(crate) fn register_exit_slot(&mut self, tid: Tid) {
        let sema = self.new_sema(0);
        self.exit_slots.insert(tid, ExitSlot { status: 0, sema });
    }
}

impl Kernel {
    /// Terminates the current thread with the given exit status. Does not
    /// return; the thread's stack unwinds and its record is reclaimed after
    /// the scheduler has switched away from it.
    ///
    /// Panics if called from the initial thread, which has no parent to
    /// collect it, or from interrupt context.
    pub fn exit(&self, status: i32) -> ! {
        self.do_exit(status);
        // Unwind back to the thread root without running the panic hook.
        std::panic::resume_unwind(Box::new(ExitToken))
    }

    /// Marks the current thread Dying, publishes its exit status, wakes a
    /// waiting parent, and switches away for the last time. On return the
    /// caller is off-CPU for good and must unwind its host thread.
    pub(crate) fn do_exit(&self, status: i32) {
        let mut g = self.sched();
        assert!(!g.intr.in_handler, "cannot exit from interrupt context");
        let cur = self.current_checked(&g);
        assert_ne!(cur, g.initial, "the initial thread cannot exit");
        assert_ne!(cur, g.idle, "the idle thread cannot exit");
        log::debug!(
            "thread {} ({}) exiting with status {}",
            cur,
            g.threads[&cur].name,
            status
        );
        let sema = {
            let slot = g
                .exit_slots
                .get_mut(&cur)
                .expect("spawned thread has no exit slot");
            slot.status = status;
            slot.sema
        };
        semaphore::sema_up(&mut g, sema);
        g.threads
            .get_mut(&cur)
            .expect("running thread vanished")
            .state = ThreadState::Dying;
        self.schedule_and_die(g);
    }

    /// Waits for child thread `child` to exit and returns its exit status.
    ///
    /// Fails with [`KernelError::NoSuchEntry`] if `child` is not an
    /// un-collected child of the calling thread, including the case where it
    /// was already collected by an earlier wait.
    pub fn wait(&self, child: Tid) -> Result<i32, KernelError> {
        let mut g = self.sched();
        let cur = self.current_checked(&g);
        let Some(pos) = g.threads[&cur].children.iter().position(|&c| c == child) else {
            return Err(KernelError::NoSuchEntry);
        };
        // Struck from the child list before blocking, so a second wait on the
        // same child fails instead of blocking forever.
        g.threads
            .get_mut(&cur)
            .expect("running thread vanished")
            .children
            .remove(pos);
        let sema = g.exit_slots[&child].sema;
        let mut g = self.sema_down_inner(g, sema);
        let slot = g
            .exit_slots
            .remove(&child)
            .expect("collected thread has no exit slot");
        g.remove_sema(slot.sema);
        Ok(slot.status)
    }
}
