//! Scheduler core: ready/sleep queues, context-switch orchestration,
//! priority donation, MLFQS recomputation.
//!
//! The whole scheduler state is one structure, [`Sched`], guarded by a single
//! mutex in [`Kernel`]; see [`crate::interrupt`] for how that guard stands in
//! for disabling interrupts. The ready queue is kept sorted by effective
//! priority, FIFO among equals, so selection is a pop of the front; insertion
//! walks to the first lower-priority entry. The contract is the ordering, not
//! the data structure.

use super::{context, SchedPolicy, Thread, ThreadState, Tid, PRI_MAX, PRI_MIN};
use crate::fixed_point::Fixed;
use crate::interrupt::IntrState;
use crate::process::ExitSlot;
use crate::sync::condvar::{CondId, CondState};
use crate::sync::lock::{LockId, LockState};
use crate::sync::semaphore::{SemaId, SemaState};
use crate::Kernel;
use std::collections::{BTreeMap, VecDeque};
use std::sync::MutexGuard;

/// Number of timer ticks in each thread's time slice.
pub(crate) const TIME_SLICE: u32 = 4;
/// How many hops a priority donation propagates through chained locks.
///
/// A conservative cap on the cost of the walk, not cycle detection; a true
/// deadlock cycle is a caller error.
pub(crate) const DONATION_DEPTH: usize = 8;
/// How often (in ticks) MLFQS recomputes every thread's priority.
pub(crate) const PRIORITY_RECALC_INTERVAL: i64 = 4;

pub(crate) type SchedGuard<'a> = MutexGuard<'a, Sched>;

/// All mutable scheduler state, one instance per [`Kernel`].
pub(crate) struct Sched {
    /// Arena of live thread records.
    pub(crate) threads: BTreeMap<Tid, Thread>,
    /// Runnable threads, highest effective priority first, FIFO on ties.
    pub(crate) ready: VecDeque<Tid>,
    /// Threads blocked until a recorded wake tick.
    pub(crate) sleepers: Vec<Tid>,
    /// Exited threads awaiting reclamation, drained at the top of the next
    /// schedule call.
    pub(crate) reclaim: Vec<Tid>,
    pub(crate) current: Tid,
    pub(crate) idle: Tid,
    /// The bootstrap thread; never reclaimed.
    pub(crate) initial: Tid,
    next_tid: Tid,
    pub(crate) mlfqs: bool,
    pub(crate) load_avg: Fixed,
    pub(crate) ticks: i64,
    /// Ticks since the running thread was last scheduled.
    pub(crate) slice_ticks: u32,
    pub(crate) idle_ticks: i64,
    pub(crate) kernel_ticks: i64,
    pub(crate) intr: IntrState,
    pub(crate) semas: BTreeMap<SemaId, SemaState>,
    pub(crate) locks: BTreeMap<LockId, LockState>,
    pub(crate) conds: BTreeMap<CondId, CondState>,
    next_obj: u64,
    /// Exit status and wait semaphore per spawned thread; outlives the
    /// thread record so a parent can collect after reclamation.
    pub(crate) exit_slots: BTreeMap<Tid, ExitSlot>,
}

impl Sched {
    pub(crate) fn new(policy: SchedPolicy) -> Sched {
        Sched {
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            sleepers: Vec::new(),
            reclaim: Vec::new(),
            current: 0,
            idle: 0,
            initial: 0,
            next_tid: 1,
            mlfqs: matches!(policy, SchedPolicy::Mlfqs),
            load_avg: Fixed::ZERO,
            ticks: 0,
            slice_ticks: 0,
            idle_ticks: 0,
            kernel_ticks: 0,
            intr: IntrState::default(),
            semas: BTreeMap::new(),
            locks: BTreeMap::new(),
            conds: BTreeMap::new(),
            next_obj: 1,
            exit_slots: BTreeMap::new(),
        }
    }

    pub(crate) fn allocate_tid(&mut self) -> Tid {
        let tid = self.next_tid;
        self.next_tid += 1;
        tid
    }

    pub(crate) fn allocate_obj_id(&mut self) -> u64 {
        let id = self.next_obj;
        self.next_obj += 1;
        id
    }

    /// Inserts `tid` into the ready queue before the first entry of strictly
    /// lower effective priority, preserving FIFO order among equals.
    pub(crate) fn enqueue_ready(&mut self, tid: Tid) {
        let priority = self.threads[&tid].priority;
        let pos = self
            .ready
            .iter()
            .position(|t| self.threads[t].priority < priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, tid);
    }

    /// Re-inserts a ready thread after its effective priority changed.
    pub(crate) fn requeue(&mut self, tid: Tid) {
        if let Some(pos) = self.ready.iter().position(|&t| t == tid) {
            self.ready.remove(pos);
            self.enqueue_ready(tid);
        }
    }

    /// Pops the highest-priority ready thread, or falls back to idle.
    fn next_thread_to_run(&mut self) -> Tid {
        self.ready.pop_front().unwrap_or(self.idle)
    }

    /// Drains the deferred-reclamation list. Runs at the top of every
    /// schedule call, once the exited threads are guaranteed off-CPU.
    fn reap(&mut self) {
        for tid in std::mem::take(&mut self.reclaim) {
            log::debug!("reclaiming thread {}", tid);
            self.threads.remove(&tid);
        }
    }

    /// Walks the chain (thread -> awaited lock -> holder), raising each
    /// holder's effective priority to at least `start`'s, for at most
    /// [`DONATION_DEPTH`] hops. Stops early at a holder that is not itself
    /// blocked on a lock.
    pub(crate) fn donate_from(&mut self, start: Tid) {
        let mut t = start;
        for _ in 0..DONATION_DEPTH {
            let Some(lock) = self.threads[&t].waiting_on else {
                break;
            };
            let Some(holder) = self.locks[&lock].holder else {
                break;
            };
            let priority = self.threads[&t].priority;
            let h = self.threads.get_mut(&holder).expect("lock holder vanished");
            if h.priority < priority {
                log::trace!("donating priority {} from {} to {}", priority, t, holder);
                h.priority = priority;
                if h.state == ThreadState::Ready {
                    self.requeue(holder);
                }
            }
            t = holder;
        }
    }

    /// Withdraws from `owner`'s donor set every thread that was donating
    /// because it waits on `lock`. Called on release of that lock.
    pub(crate) fn remove_donations_for(&mut self, owner: Tid, lock: LockId) {
        let kept: Vec<Tid> = self.threads[&owner]
            .donors
            .iter()
            .copied()
            .filter(|d| self.threads[d].waiting_on != Some(lock))
            .collect();
        self.threads.get_mut(&owner).expect("lock owner vanished").donors = kept;
    }

    /// Recomputes `tid`'s effective priority as the max of its base priority
    /// and its remaining donors' priorities.
    pub(crate) fn refresh_priority(&mut self, tid: Tid) {
        let base = self.threads[&tid].base_priority;
        let donated = self.threads[&tid]
            .donors
            .iter()
            .map(|d| self.threads[d].priority)
            .max()
            .unwrap_or(PRI_MIN);
        let th = self.threads.get_mut(&tid).expect("thread vanished");
        th.priority = base.max(donated);
        if th.state == ThreadState::Ready {
            self.requeue(tid);
        }
    }

    /// `PRI_MAX - recent_cpu / 4 - nice * 2`, clamped.
    pub(crate) fn mlfqs_priority(&self, recent_cpu: Fixed, nice: i32) -> i32 {
        let p = Fixed::from_int(PRI_MAX) - recent_cpu.div_int(4) - Fixed::from_int(nice * 2);
        p.to_int_zero().clamp(PRI_MIN, PRI_MAX)
    }

    /// Recomputes one thread's MLFQS priority in place.
    pub(crate) fn recompute_priority(&mut self, tid: Tid) {
        let (recent_cpu, nice) = {
            let th = &self.threads[&tid];
            (th.recent_cpu, th.nice)
        };
        let priority = self.mlfqs_priority(recent_cpu, nice);
        let th = self.threads.get_mut(&tid).expect("thread vanished");
        th.priority = priority;
        th.base_priority = priority;
    }

    /// Per-tick accounting: category counters, MLFQS decay, time slice.
    pub(crate) fn thread_tick(&mut self, now: i64) {
        let cur = self.current;
        if cur == self.idle {
            self.idle_ticks += 1;
        } else {
            self.kernel_ticks += 1;
        }

        if self.mlfqs {
            if cur != self.idle {
                let th = self.threads.get_mut(&cur).expect("running thread vanished");
                th.recent_cpu = th.recent_cpu.add_int(1);
            }
            if now % crate::timer::TIMER_FREQ == 0 {
                self.recompute_load_avg();
                self.decay_recent_cpu();
            }
            if now % PRIORITY_RECALC_INTERVAL == 0 {
                self.recompute_all_priorities();
            }
        }

        self.slice_ticks += 1;
        if self.slice_ticks >= TIME_SLICE {
            self.intr.yield_on_return = true;
        }
    }

    /// `load_avg = (59/60) * load_avg + (1/60) * ready_threads`, where
    /// `ready_threads` counts the ready queue plus the running thread
    /// (excluding idle). Runs once per second.
    fn recompute_load_avg(&mut self) {
        let ready_threads =
            self.ready.len() as i32 + if self.current == self.idle { 0 } else { 1 };
        let fifty_nine_sixty = Fixed::from_int(59).div(Fixed::from_int(60));
        let one_sixty = Fixed::from_int(1).div(Fixed::from_int(60));
        self.load_avg = fifty_nine_sixty.mul(self.load_avg) + one_sixty.mul_int(ready_threads);
    }

    /// `recent_cpu = (2*load_avg) / (2*load_avg + 1) * recent_cpu + nice`
    /// for every thread. Runs once per second, right after the load average.
    fn decay_recent_cpu(&mut self) {
        let twice_load = self.load_avg.mul_int(2);
        let coefficient = twice_load.div(twice_load.add_int(1));
        let idle = self.idle;
        for (&tid, th) in self.threads.iter_mut() {
            if tid == idle || th.state == ThreadState::Dying {
                continue;
            }
            th.recent_cpu = coefficient.mul(th.recent_cpu).add_int(th.nice);
        }
    }

    /// Recomputes every thread's priority and restores the ready-queue order.
    fn recompute_all_priorities(&mut self) {
        let tids: Vec<Tid> = self
            .threads
            .iter()
            .filter(|(&tid, th)| tid != self.idle && th.state != ThreadState::Dying)
            .map(|(&tid, _)| tid)
            .collect();
        for tid in tids {
            self.recompute_priority(tid);
        }
        let mut queue: Vec<Tid> = self.ready.iter().copied().collect();
        // Stable sort keeps FIFO order among equal priorities.
        queue.sort_by_key(|t| std::cmp::Reverse(self.threads[t].priority));
        self.ready = queue.into();
    }
}

/// Transitions a blocked thread to Ready and queues it. Fatal if the thread
/// is not currently Blocked. Does not preempt the running thread; callers
/// that want preemption follow up with [`Kernel::preempt_check`].
pub(crate) fn unblock(g: &mut Sched, tid: Tid) {
    let th = g.threads.get_mut(&tid).expect("unblock: no such thread");
    assert_eq!(
        th.state,
        ThreadState::Blocked,
        "unblock: thread {} ({}) is not blocked",
        tid,
        th.name
    );
    th.state = ThreadState::Ready;
    g.enqueue_ready(tid);
}

impl Kernel {
    /// Suspends the current thread. The caller must already have placed it
    /// into whatever wait structure is appropriate; this performs no queue
    /// insertion of its own. Returns once the thread is scheduled again.
    pub(crate) fn block<'a>(&'a self, mut g: SchedGuard<'a>) -> SchedGuard<'a> {
        assert!(!g.intr.in_handler, "cannot block from interrupt context");
        let cur = g.current;
        assert_ne!(cur, g.idle, "the idle thread cannot block");
        g.threads.get_mut(&cur).expect("running thread vanished").state = ThreadState::Blocked;
        self.schedule(g)
    }

    /// Switches to the next thread. The current thread's new state must
    /// already be set (Ready and queued, or Blocked); control returns here
    /// once this thread is made current again.
    pub(crate) fn schedule<'a>(&'a self, mut g: SchedGuard<'a>) -> SchedGuard<'a> {
        debug_assert!(!g.intr.in_handler, "cannot context-switch from interrupt context");
        g.reap();
        let prev = g.current;
        debug_assert_ne!(g.threads[&prev].state, ThreadState::Running);
        let next = g.next_thread_to_run();
        g.threads.get_mut(&next).expect("next thread vanished").state = ThreadState::Running;
        g.current = next;
        g.slice_ticks = 0;
        if next == prev {
            return g;
        }
        log::debug!(
            "switch: {} ({}) -> {} ({})",
            prev,
            g.threads[&prev].name,
            next,
            g.threads[&next].name
        );
        let wake = g.threads[&next].switch.clone();
        drop(g);
        wake.wake();
        loop {
            context::park();
            let g = self.sched();
            if g.current == prev {
                return g;
            }
            drop(g);
        }
    }

    /// Final switch of an exiting thread: selects the next thread, queues the
    /// caller for deferred reclamation, and returns without ever parking. The
    /// caller's host thread must unwind and terminate afterwards.
    pub(crate) fn schedule_and_die(&self, mut g: SchedGuard<'_>) {
        g.reap();
        let prev = g.current;
        debug_assert_eq!(g.threads[&prev].state, ThreadState::Dying);
        let next = g.next_thread_to_run();
        g.threads.get_mut(&next).expect("next thread vanished").state = ThreadState::Running;
        g.current = next;
        g.slice_ticks = 0;
        g.reclaim.push(prev);
        log::debug!("thread {} exited, switching to {}", prev, next);
        let wake = g.threads[&next].switch.clone();
        drop(g);
        wake.wake();
    }

    /// Yields if the ready-queue head now outranks the running thread. From
    /// interrupt context the yield is deferred to the handler's return.
    pub(crate) fn preempt_check<'a>(&'a self, mut g: SchedGuard<'a>) -> SchedGuard<'a> {
        let cur = g.current;
        let outranked = match g.ready.front() {
            Some(head) => g.threads[head].priority > g.threads[&cur].priority,
            None => false,
        };
        if !outranked {
            return g;
        }
        if g.intr.in_handler {
            g.intr.yield_on_return = true;
            return g;
        }
        g.threads.get_mut(&cur).expect("running thread vanished").state = ThreadState::Ready;
        if cur != g.idle {
            g.enqueue_ready(cur);
        }
        self.schedule(g)
    }
}
