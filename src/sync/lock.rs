//! Mutual-exclusion lock with priority donation.
//!
//! A lock is a binary semaphore that additionally tracks its holder, which is
//! what makes priority donation possible: a high-priority thread blocking on
//! a held lock raises the holder's effective priority, transitively through
//! chains of locks, so the holder cannot be starved out from under the waiter
//! by a middle-priority thread.
//!
//! Donation applies only under [`crate::SchedPolicy::Priority`]; the MLFQS
//! policy controls priorities itself and disables it.
//!
//! Unlike a semaphore, a lock has an owner: only the thread that acquired it
//! may release it, and acquiring a lock already held by the caller is a bug
//! that panics rather than a recursive acquire.

use super::semaphore::{self, SemaId};
use crate::thread::scheduler::{Sched, SchedGuard};
use crate::thread::Tid;
use crate::Kernel;

pub(crate) type LockId = u64;

/// Scheduler-side state of one lock.
pub(crate) struct LockState {
    pub(crate) holder: Option<Tid>,
    pub(crate) sema: SemaId,
}

impl Sched {
    pub(crate) fn new_lock(&mut self) -> LockId {
        let sema = self.new_sema(1);
        let id = self.allocate_obj_id();
        self.locks.insert(id, LockState { holder: None, sema });
        id
    }
}

impl Kernel {
    pub(crate) fn lock_acquire_inner<'a>(
        &'a self,
        mut g: SchedGuard<'a>,
        id: LockId,
    ) -> SchedGuard<'a> {
        assert!(
            !g.intr.in_handler,
            "cannot acquire a lock from interrupt context"
        );
        let cur = self.current_checked(&g);
        assert_ne!(
            g.locks[&id].holder,
            Some(cur),
            "thread {} acquiring a lock it already holds",
            cur
        );

        if !g.mlfqs {
            if let Some(holder) = g.locks[&id].holder {
                // Record what we wait on, register as a donor, and push our
                // priority down the chain before blocking.
                g.threads.get_mut(&cur).expect("running thread vanished").waiting_on = Some(id);
                g.threads.get_mut(&holder).expect("lock holder vanished").donors.push(cur);
                g.donate_from(cur);
            }
        }

        let sema = g.locks[&id].sema;
        let mut g = self.sema_down_inner(g, sema);

        g.threads.get_mut(&cur).expect("running thread vanished").waiting_on = None;
        g.locks.get_mut(&id).expect("lock vanished").holder = Some(cur);
        if !g.mlfqs {
            // Threads still blocked on this lock now donate to the new
            // holder; their entries on the previous holder were withdrawn at
            // release.
            let inherited: Vec<Tid> = g
                .threads
                .iter()
                .filter(|(&t, th)| t != cur && th.waiting_on == Some(id))
                .map(|(&t, _)| t)
                .collect();
            g.threads
                .get_mut(&cur)
                .expect("running thread vanished")
                .donors
                .extend(inherited);
            g.refresh_priority(cur);
        }
        g
    }

    pub(crate) fn lock_release_inner<'a>(
        &'a self,
        mut g: SchedGuard<'a>,
        id: LockId,
    ) -> SchedGuard<'a> {
        let cur = self.current_checked(&g);
        assert_eq!(
            g.locks[&id].holder,
            Some(cur),
            "thread {} releasing a lock it does not hold",
            cur
        );
        g.locks.get_mut(&id).expect("lock vanished").holder = None;
        if !g.mlfqs {
            // Withdraw the donations that came through this lock and fall
            // back to base priority plus whatever other locks still donate.
            g.remove_donations_for(cur, id);
            g.refresh_priority(cur);
        }
        let sema = g.locks[&id].sema;
        if semaphore::sema_up(&mut g, sema).is_some() {
            g = self.preempt_check(g);
        }
        g
    }
}

/// A mutual-exclusion lock bound to a [`Kernel`].
#[derive(Clone)]
pub struct Lock {
    kernel: Kernel,
    id: LockId,
}

impl Lock {
    /// Creates a lock, initially not held by any thread.
    pub fn new(kernel: &Kernel) -> Lock {
        let id = kernel.sched().new_lock();
        Lock {
            kernel: kernel.clone(),
            id,
        }
    }

    pub(crate) fn id(&self) -> LockId {
        self.id
    }

    /// Acquires the lock, waiting until it is free. While waiting, the
    /// caller's priority is donated to the holder.
    pub fn acquire(&self) {
        let g = self.kernel.sched();
        let g = self.kernel.lock_acquire_inner(g, self.id);
        drop(g);
    }

    /// Releases the lock and wakes the highest-priority waiter, yielding to
    /// it if it outranks the caller. Panics if the caller does not hold it.
    pub fn release(&self) {
        let g = self.kernel.sched();
        let g = self.kernel.lock_release_inner(g, self.id);
        drop(g);
    }

    /// Acquires the lock only if it is free right now, without waiting and
    /// without donating. Returns whether the lock was acquired.
    pub fn try_acquire(&self) -> bool {
        let mut g = self.kernel.sched();
        let cur = self.kernel.current_checked(&g);
        assert_ne!(
            g.locks[&self.id].holder,
            Some(cur),
            "thread {} acquiring a lock it already holds",
            cur
        );
        if g.locks[&self.id].holder.is_some() {
            return false;
        }
        let sema = g.locks[&self.id].sema;
        let state = g.semas.get_mut(&sema).expect("semaphore vanished");
        debug_assert!(state.value > 0);
        state.value -= 1;
        g.locks.get_mut(&self.id).expect("lock vanished").holder = Some(cur);
        true
    }

    /// Returns whether the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        let g = self.kernel.sched();
        let cur = self.kernel.current_checked(&g);
        g.locks[&self.id].holder == Some(cur)
    }
}
