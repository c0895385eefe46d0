//! Counting semaphore.
//!
//! A semaphore is a non-negative counter with two atomic operations: down
//! ("P"), which waits for the counter to become positive and decrements it,
//! and up ("V"), which increments it and releases one waiter. The wait list
//! is not a strict FIFO: up picks the highest-priority waiter at wake time,
//! first-come-first-served among equals, so a donation or priority change
//! that happens while a thread waits is honored.

use crate::thread::scheduler::{self, Sched, SchedGuard};
use crate::thread::Tid;
use crate::Kernel;

pub(crate) type SemaId = u64;

/// Scheduler-side state of one semaphore.
pub(crate) struct SemaState {
    pub(crate) value: u32,
    /// Blocked downers, in arrival order. Selection happens at up time.
    pub(crate) waiters: Vec<Tid>,
}

impl Sched {
    pub(crate) fn new_sema(&mut self, value: u32) -> SemaId {
        let id = self.allocate_obj_id();
        self.semas.insert(
            id,
            SemaState {
                value,
                waiters: Vec::new(),
            },
        );
        id
    }

    pub(crate) fn remove_sema(&mut self, id: SemaId) {
        let state = self.semas.remove(&id).expect("semaphore vanished");
        assert!(
            state.waiters.is_empty(),
            "destroying a semaphore with blocked waiters"
        );
    }
}

/// Increments the counter and unblocks the highest-priority waiter, if any.
///
/// Returns the woken thread so callers on a thread context can follow up with
/// a preemption check; safe to call from the tick handler.
pub(crate) fn sema_up(g: &mut Sched, id: SemaId) -> Option<Tid> {
    g.semas.get_mut(&id).expect("semaphore vanished").value += 1;
    let waiters = g.semas[&id].waiters.clone();
    if waiters.is_empty() {
        return None;
    }
    let mut best = 0;
    for i in 1..waiters.len() {
        if g.threads[&waiters[i]].priority > g.threads[&waiters[best]].priority {
            best = i;
        }
    }
    let tid = waiters[best];
    g.semas
        .get_mut(&id)
        .expect("semaphore vanished")
        .waiters
        .remove(best);
    scheduler::unblock(g, tid);
    Some(tid)
}

impl Kernel {
    /// Down on a raw semaphore with the scheduler already locked. Loops
    /// because the counter may be consumed by a third thread between the wake
    /// and the re-check.
    pub(crate) fn sema_down_inner<'a>(
        &'a self,
        mut g: SchedGuard<'a>,
        id: SemaId,
    ) -> SchedGuard<'a> {
        assert!(
            !g.intr.in_handler,
            "cannot down a semaphore from interrupt context"
        );
        let cur = self.current_checked(&g);
        loop {
            let state = g.semas.get_mut(&id).expect("semaphore vanished");
            if state.value > 0 {
                state.value -= 1;
                return g;
            }
            state.waiters.push(cur);
            g = self.block(g);
        }
    }
}

/// A counting semaphore bound to a [`Kernel`].
#[derive(Clone)]
pub struct Semaphore {
    kernel: Kernel,
    id: SemaId,
}

impl Semaphore {
    /// Creates a semaphore with the given initial counter.
    pub fn new(kernel: &Kernel, value: u32) -> Semaphore {
        let id = kernel.sched().new_sema(value);
        Semaphore {
            kernel: kernel.clone(),
            id,
        }
    }

    /// Waits until the counter is positive, then decrements it.
    pub fn down(&self) {
        let g = self.kernel.sched();
        let g = self.kernel.sema_down_inner(g, self.id);
        drop(g);
    }

    /// Decrements the counter if it is positive, without waiting. Returns
    /// whether the decrement happened.
    pub fn try_down(&self) -> bool {
        let mut g = self.kernel.sched();
        let state = g.semas.get_mut(&self.id).expect("semaphore vanished");
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increments the counter and wakes the highest-priority waiter. If the
    /// woken thread outranks the caller, the caller yields to it; from the
    /// tick handler the yield is deferred instead.
    pub fn up(&self) {
        let mut g = self.kernel.sched();
        if sema_up(&mut g, self.id).is_some() {
            let g = self.kernel.preempt_check(g);
            drop(g);
        }
    }

    /// Returns the current counter value. Only a snapshot: another thread may
    /// change it before the caller acts on it.
    pub fn value(&self) -> u32 {
        self.kernel.sched().semas[&self.id].value
    }
}
