//! Condition variable.
//!
//! A condition variable lets a thread atomically release a lock and wait for
//! some condition to be signaled by another thread. The semantics are Mesa
//! style, not Hoare style: signal only releases a waiter, it does not hand
//! the lock over, so the woken thread must re-check its condition after
//! re-acquiring the lock (hence the `while` loop in every correct caller).
//!
//! Each waiter parks on a private one-shot semaphore. Keeping one semaphore
//! per waiter, rather than one shared wait list, is what lets signal pick the
//! highest-priority waiter while broadcast releases everyone.

use super::lock::Lock;
use super::semaphore::{self, SemaId};
use crate::thread::scheduler::Sched;
use crate::thread::Tid;
use crate::Kernel;

pub(crate) type CondId = u64;

/// One parked waiter: the private semaphore it sleeps on, and its identity
/// for priority selection at signal time.
pub(crate) struct CondWaiter {
    pub(crate) sema: SemaId,
    pub(crate) tid: Tid,
}

/// Scheduler-side state of one condition variable.
pub(crate) struct CondState {
    pub(crate) waiters: Vec<CondWaiter>,
}

impl Sched {
    pub(crate) fn new_cond(&mut self) -> CondId {
        let id = self.allocate_obj_id();
        self.conds.insert(id, CondState { waiters: Vec::new() });
        id
    }

    /// Removes and returns the highest-priority waiter, arrival order among
    /// equals. None if nobody is waiting.
    fn take_cond_waiter(&mut self, id: CondId) -> Option<CondWaiter> {
        let waiters = &self.conds[&id].waiters;
        if waiters.is_empty() {
            return None;
        }
        let mut best = 0;
        for i in 1..waiters.len() {
            if self.threads[&waiters[i].tid].priority > self.threads[&waiters[best].tid].priority {
                best = i;
            }
        }
        Some(
            self.conds
                .get_mut(&id)
                .expect("condvar vanished")
                .waiters
                .remove(best),
        )
    }
}

/// A condition variable bound to a [`Kernel`].
#[derive(Clone)]
pub struct Condvar {
    kernel: Kernel,
    id: CondId,
}

impl Condvar {
    /// Creates a condition variable with no waiters.
    pub fn new(kernel: &Kernel) -> Condvar {
        let id = kernel.sched().new_cond();
        Condvar {
            kernel: kernel.clone(),
            id,
        }
    }

    /// Atomically releases `lock` and waits to be signaled, then re-acquires
    /// `lock` before returning. The caller must hold `lock`, and must
    /// re-check its condition on return.
    pub fn wait(&self, lock: &Lock) {
        {
            let mut g = self.kernel.sched();
            assert!(
                !g.intr.in_handler,
                "cannot wait on a condvar from interrupt context"
            );
            let cur = self.kernel.current_checked(&g);
            assert_eq!(
                g.locks[&lock.id()].holder,
                Some(cur),
                "condvar wait without holding the lock"
            );
            let sema = g.new_sema(0);
            g.conds
                .get_mut(&self.id)
                .expect("condvar vanished")
                .waiters
                .push(CondWaiter { sema, tid: cur });
            // The registration above and the release below happen under one
            // guard, so a signal between "release" and "sleep" cannot be
            // missed: it finds us on the wait list and ups our semaphore.
            let g = self.kernel.lock_release_inner(g, lock.id());
            let mut g = self.kernel.sema_down_inner(g, sema);
            g.remove_sema(sema);
        }
        lock.acquire();
    }

    /// Wakes the highest-priority waiter, if any. The caller must hold
    /// `lock`. Signaling with no waiters is a no-op.
    pub fn signal(&self, lock: &Lock) {
        let mut g = self.kernel.sched();
        let cur = self.kernel.current_checked(&g);
        assert_eq!(
            g.locks[&lock.id()].holder,
            Some(cur),
            "condvar signal without holding the lock"
        );
        if let Some(waiter) = g.take_cond_waiter(self.id) {
            semaphore::sema_up(&mut g, waiter.sema);
            let g = self.kernel.preempt_check(g);
            drop(g);
        }
    }

    /// Wakes every waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        let mut g = self.kernel.sched();
        let cur = self.kernel.current_checked(&g);
        assert_eq!(
            g.locks[&lock.id()].holder,
            Some(cur),
            "condvar broadcast without holding the lock"
        );
        let mut woke = false;
        while let Some(waiter) = g.take_cond_waiter(self.id) {
            semaphore::sema_up(&mut g, waiter.sema);
            woke = true;
        }
        if woke {
            let g = self.kernel.preempt_check(g);
            drop(g);
        }
    }
}
