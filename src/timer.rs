//! Timer: tick counting, per-thread sleep, preemption timing.
//!
//! Time is virtual, measured in ticks at a nominal [`TIMER_FREQ`] of 100
//! ticks per second. A tick is delivered by [`Kernel::timer_interrupt`],
//! called either by a test driving time by hand or by the idle thread when
//! every other thread is asleep; the kernel never consults wall-clock time.
//!
//! A sleeping thread is blocked with a recorded wakeup tick, not spun: the
//! tick handler scans the sleep list and unblocks everything that has come
//! due. The handler itself never context-switches; when a wakeup or an
//! expired time slice calls for one, it sets the deferred-yield flag and the
//! switch happens on handler return.

use crate::thread::{scheduler, ThreadState, Tid};
use crate::Kernel;

/// Nominal timer interrupts per second of virtual time.
pub const TIMER_FREQ: i64 = 100;

impl Kernel {
    /// Returns the number of ticks since boot.
    pub fn ticks(&self) -> i64 {
        self.sched().ticks
    }

    /// Returns the number of ticks elapsed since `then`.
    pub fn elapsed(&self, then: i64) -> i64 {
        self.ticks() - then
    }

    /// Suspends the current thread for at least `ticks` timer ticks. A
    /// non-positive duration just yields.
    pub fn sleep(&self, ticks: i64) {
        if ticks <= 0 {
            self.yield_now();
            return;
        }
        let mut g = self.sched();
        assert!(!g.intr.in_handler, "cannot sleep from interrupt context");
        let cur = self.current_checked(&g);
        let wakeup = g.ticks + ticks;
        g.threads
            .get_mut(&cur)
            .expect("running thread vanished")
            .wakeup_tick = wakeup;
        g.sleepers.push(cur);
        log::trace!("thread {} sleeping until tick {}", cur, wakeup);
        let g = self.block(g);
        drop(g);
    }

    /// Suspends the current thread for approximately `ms` milliseconds.
    pub fn msleep(&self, ms: i64) {
        self.real_time_sleep(ms, 1000);
    }

    /// Suspends the current thread for approximately `us` microseconds.
    pub fn usleep(&self, us: i64) {
        self.real_time_sleep(us, 1_000_000);
    }

    /// Suspends the current thread for approximately `ns` nanoseconds.
    pub fn nsleep(&self, ns: i64) {
        self.real_time_sleep(ns, 1_000_000_000);
    }

    /// Sleeps for `num / denom` seconds of virtual time. Durations shorter
    /// than one tick round down to a plain yield.
    fn real_time_sleep(&self, num: i64, denom: i64) {
        let ticks = num * TIMER_FREQ / denom;
        if ticks > 0 {
            self.sleep(ticks);
        } else {
            self.yield_now();
        }
    }

    /// Delivers one timer tick: advances the clock, charges the running
    /// thread, recomputes MLFQS state on schedule, wakes due sleepers, and
    /// finally yields if the handler requested it.
    ///
    /// This is the external-interrupt entry point: while the handler body
    /// runs, blocking operations are forbidden and preemption is deferred.
    pub fn timer_interrupt(&self) {
        let mut g = self.sched();
        assert!(!g.intr.in_handler, "nested timer interrupt");
        g.intr.in_handler = true;
        g.ticks += 1;
        let now = g.ticks;
        g.thread_tick(now);

        // Wake every sleeper that has come due. A woken thread that outranks
        // the interrupted one forces a yield on return.
        let mut i = 0;
        while i < g.sleepers.len() {
            let tid = g.sleepers[i];
            if g.threads[&tid].wakeup_tick <= now {
                g.sleepers.swap_remove(i);
                scheduler::unblock(&mut g, tid);
                log::trace!("tick {}: waking thread {}", now, tid);
                if g.threads[&tid].priority > g.threads[&g.current].priority {
                    g.intr.yield_on_return = true;
                }
            } else {
                i += 1;
            }
        }

        g.intr.in_handler = false;
        if g.intr.yield_on_return {
            g.intr.yield_on_return = false;
            let cur = g.current;
            g.threads
                .get_mut(&cur)
                .expect("running thread vanished")
                .state = ThreadState::Ready;
            if cur != g.idle {
                g.enqueue_ready(cur);
            }
            let g = self.schedule(g);
            drop(g);
        }
    }

    /// Runs the timer forward by `n` ticks. Test convenience around
    /// [`Kernel::timer_interrupt`].
    pub fn run_ticks(&self, n: i64) {
        for _ in 0..n {
            self.timer_interrupt();
        }
    }

    /// Returns the wakeup tick recorded for a sleeping thread, if it is
    /// currently on the sleep list.
    pub fn wakeup_tick_of(&self, tid: Tid) -> Option<i64> {
        let g = self.sched();
        if g.sleepers.contains(&tid) {
            Some(g.threads[&tid].wakeup_tick)
        } else {
            None
        }
    }
}
