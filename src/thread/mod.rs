//! Thread abstraction, an abstraction of the CPU.
//!
//! An executing kernel consists of a collection of threads, each with its own
//! stack and local state. Threads are named, carry a scheduling priority, and
//! move through a small state machine ([`ThreadState`]) driven by the
//! scheduler in [`scheduler`].
//!
//! ## Lifecycle
//!
//! A thread is created blocked, immediately unblocked into the ready queue,
//! and from then on alternates between Ready, Running and Blocked until it
//! exits. An exiting thread becomes Dying and is reclaimed only after the
//! scheduler has switched away from it: its record is queued for deferred
//! destruction and freed at the top of a *subsequent* schedule call, never
//! while it might still be the active execution context.
//!
//! The thread records themselves live in an arena keyed by [`Tid`]; the
//! ready and sleep queues hold handles, not pointers, so a stale handle can
//! at worst miss, never dangle.

pub(crate) mod context;
pub mod scheduler;

use crate::fixed_point::Fixed;
use crate::process::ExitToken;
use crate::sync::lock::LockId;
use crate::KernelError;
use context::SwitchHandle;
use crossbeam_utils::sync::Parker;
use scheduler::Sched;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lowest possible thread priority.
pub const PRI_MIN: i32 = 0;
/// Default thread priority.
pub const PRI_DEFAULT: i32 = 31;
/// Highest possible thread priority.
pub const PRI_MAX: i32 = 63;

/// A thread identifier. Unique, monotonically increasing, never reused.
pub type Tid = u64;

/// A possible state of a thread.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ThreadState {
    /// Runnable, waiting in the ready queue.
    Ready,
    /// Currently executing. Exactly one thread is Running at any instant.
    Running,
    /// Suspended until explicitly unblocked (semaphore, lock, sleep).
    Blocked,
    /// Exited, pending deferred reclamation.
    Dying,
}

/// The scheduling policy a [`Kernel`] boots with.
///
/// The two policies are mutually exclusive: under [`SchedPolicy::Mlfqs`]
/// priorities are recomputed from CPU usage and niceness, and both manual
/// priority assignment and priority donation are disabled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SchedPolicy {
    /// Round-robin with fixed priorities and priority donation.
    Priority,
    /// Multi-level feedback queue scheduler.
    Mlfqs,
}

/// A thread control block.
pub(crate) struct Thread {
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    /// Priority as set by the thread or its creator.
    pub(crate) base_priority: i32,
    /// Effective priority: base, or higher while donations are active.
    pub(crate) priority: i32,
    /// Threads currently donating to this one (waiters on locks it holds).
    pub(crate) donors: Vec<Tid>,
    /// The lock this thread is blocked trying to acquire, if any.
    pub(crate) waiting_on: Option<LockId>,
    pub(crate) nice: i32,
    pub(crate) recent_cpu: Fixed,
    /// Absolute tick at which a sleeping thread becomes runnable again.
    pub(crate) wakeup_tick: i64,
    /// Children spawned by this thread that have not been collected yet.
    pub(crate) children: Vec<Tid>,
    /// Waker half of the thread's execution context.
    pub(crate) switch: SwitchHandle,
    /// Identity of the carrying host thread. The running thread's record must
    /// match the host thread entering the kernel.
    pub(crate) host: Option<std::thread::ThreadId>,
}

impl Thread {
    pub(crate) fn new(name: String, priority: i32, switch: SwitchHandle) -> Self {
        Self {
            name,
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            donors: Vec::new(),
            waiting_on: None,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            wakeup_tick: 0,
            children: Vec::new(),
            switch,
            host: None,
        }
    }
}

/// Tick accounting counters, see [`Kernel::stats`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Stats {
    /// Ticks elapsed since boot.
    pub ticks: i64,
    /// Ticks spent in the idle thread.
    pub idle_ticks: i64,
    /// Ticks spent in kernel threads.
    pub kernel_ticks: i64,
}

pub(crate) struct KernelInner {
    pub(crate) sched: Mutex<Sched>,
}

/// The scheduler context: one logical CPU and the threads it runs.
///
/// All scheduling entry points hang off this handle. It is cheap to clone and
/// is passed by reference into every thread body. There is no teardown; a
/// kernel lives until the process exits.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

impl Kernel {
    /// Boots a kernel: turns the calling host thread into the initial kernel
    /// thread ("main", [`PRI_DEFAULT`]) and creates the idle thread.
    ///
    /// The idle thread is scheduled only when the ready queue is empty and is
    /// never placed on the ready queue itself. While running with nothing to
    /// do it advances the timer, so sleeping threads make progress without an
    /// external tick source.
    pub fn new(policy: SchedPolicy) -> Kernel {
        let kernel = Kernel {
            inner: Arc::new(KernelInner {
                sched: Mutex::new(Sched::new(policy)),
            }),
        };

        let parker = Parker::new();
        let switch = SwitchHandle::new(parker.unparker().clone());
        context::install(parker);
        {
            let mut g = kernel.sched();
            let tid = g.allocate_tid();
            let mut th = Thread::new("main".into(), PRI_DEFAULT, switch);
            th.state = ThreadState::Running;
            th.host = Some(std::thread::current().id());
            g.threads.insert(tid, th);
            g.current = tid;
            g.initial = tid;
        }

        let parker = Parker::new();
        let switch = SwitchHandle::new(parker.unparker().clone());
        let idle_tid = {
            let mut g = kernel.sched();
            let tid = g.allocate_tid();
            g.threads.insert(tid, Thread::new("idle".into(), PRI_MIN, switch));
            g.idle = tid;
            tid
        };
        let k = kernel.clone();
        std::thread::Builder::new()
            .name("idle".into())
            .spawn(move || idle_loop(k, idle_tid, parker))
            .expect("failed to spawn the idle host thread");

        kernel
    }

    /// Locks the scheduler state. Holding the guard is the hosted equivalent
    /// of running with interrupts disabled.
    pub(crate) fn sched(&self) -> MutexGuard<'_, Sched> {
        // A poisoned mutex means some thread panicked mid-operation; the
        // diagnostics of the original panic are what matters, so keep going.
        self.inner
            .sched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the running thread's handle after checking that the calling
    /// host thread really is the one carrying it.
    pub(crate) fn current_checked(&self, g: &Sched) -> Tid {
        let cur = g.current;
        let th = g.threads.get(&cur).expect("current thread record missing");
        if let Some(host) = th.host {
            assert_eq!(
                host,
                std::thread::current().id(),
                "kernel entered from a host thread that is not the running thread"
            );
        }
        cur
    }

    /// Returns the running thread's id.
    pub fn current(&self) -> Tid {
        let g = self.sched();
        self.current_checked(&g)
    }

    /// Returns the running thread's name.
    pub fn thread_name(&self) -> String {
        let g = self.sched();
        let cur = self.current_checked(&g);
        g.threads[&cur].name.clone()
    }

    /// Looks up the state of the thread `tid`.
    ///
    /// Fails with [`KernelError::NoSuchEntry`] once the thread has been
    /// reclaimed.
    pub fn state_of(&self, tid: Tid) -> Result<ThreadState, KernelError> {
        let g = self.sched();
        g.threads
            .get(&tid)
            .map(|th| th.state)
            .ok_or(KernelError::NoSuchEntry)
    }

    /// Yields the CPU. The current thread is re-queued and may be scheduled
    /// again immediately if it still has the highest priority.
    pub fn yield_now(&self) {
        let mut g = self.sched();
        assert!(!g.intr.in_handler, "cannot yield from interrupt context");
        let cur = self.current_checked(&g);
        g.threads.get_mut(&cur).expect("running thread vanished").state = ThreadState::Ready;
        if cur != g.idle {
            g.enqueue_ready(cur);
        }
        let g = self.schedule(g);
        drop(g);
    }

    /// Sets the current thread's base priority and re-evaluates its effective
    /// priority against any remaining donors. Ignored under MLFQS.
    ///
    /// Lowering the priority below the ready-queue head yields immediately.
    pub fn set_priority(&self, priority: i32) {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );
        let mut g = self.sched();
        let cur = self.current_checked(&g);
        if !g.mlfqs {
            g.threads.get_mut(&cur).expect("running thread vanished").base_priority = priority;
            g.refresh_priority(cur);
        }
        let g = self.preempt_check(g);
        drop(g);
    }

    /// Returns the current thread's effective priority.
    pub fn get_priority(&self) -> i32 {
        let g = self.sched();
        let cur = self.current_checked(&g);
        g.threads[&cur].priority
    }

    /// Sets the current thread's nice value, clamped to [-20, 20], and
    /// recomputes its priority. Meaningful only under MLFQS.
    pub fn set_nice(&self, nice: i32) {
        let nice = nice.clamp(-20, 20);
        let mut g = self.sched();
        let cur = self.current_checked(&g);
        g.threads.get_mut(&cur).expect("running thread vanished").nice = nice;
        if g.mlfqs {
            g.recompute_priority(cur);
        }
        let g = self.preempt_check(g);
        drop(g);
    }

    /// Returns the current thread's nice value.
    pub fn get_nice(&self) -> i32 {
        let g = self.sched();
        let cur = self.current_checked(&g);
        g.threads[&cur].nice
    }

    /// Returns 100 times the system load average, rounded to nearest.
    pub fn get_load_avg(&self) -> i32 {
        let g = self.sched();
        g.load_avg.mul_int(100).to_int_nearest()
    }

    /// Returns 100 times the current thread's `recent_cpu`, rounded to
    /// nearest.
    pub fn get_recent_cpu(&self) -> i32 {
        let g = self.sched();
        let cur = self.current_checked(&g);
        g.threads[&cur].recent_cpu.mul_int(100).to_int_nearest()
    }

    /// Returns the tick accounting counters.
    pub fn stats(&self) -> Stats {
        let g = self.sched();
        Stats {
            ticks: g.ticks,
            idle_ticks: g.idle_ticks,
            kernel_ticks: g.kernel_ticks,
        }
    }

    fn spawn_inner<F>(&self, name: String, priority: i32, f: F) -> Tid
    where
        F: FnOnce(&Kernel) + Send + 'static,
    {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "priority {} out of range",
            priority
        );

        let parker = Parker::new();
        let switch = SwitchHandle::new(parker.unparker().clone());

        let tid = {
            let mut g = self.sched();
            let parent = self.current_checked(&g);
            let tid = g.allocate_tid();
            let mut th = Thread::new(name.clone(), priority, switch);
            // Nice and recent_cpu are inherited from the creator; the MLFQS
            // decay rules then take over.
            th.nice = g.threads[&parent].nice;
            th.recent_cpu = g.threads[&parent].recent_cpu;
            if g.mlfqs {
                th.priority = g.mlfqs_priority(th.recent_cpu, th.nice);
                th.base_priority = th.priority;
            }
            g.threads.insert(tid, th);
            g.register_exit_slot(tid);
            g.threads.get_mut(&parent).expect("parent vanished").children.push(tid);
            tid
        };

        let k = self.clone();
        std::thread::Builder::new()
            .name(name)
            .spawn(move || run_thread(k, tid, parker, f))
            .expect("failed to spawn host thread");

        let mut g = self.sched();
        scheduler::unblock(&mut g, tid);
        log::debug!("created thread {} ({})", tid, g.threads[&tid].name);
        // Preemptive creation: a freshly created higher-priority thread runs
        // promptly, not just at the next tick.
        let g = self.preempt_check(g);
        drop(g);
        tid
    }
}

/// A builder for a new kernel thread.
pub struct ThreadBuilder {
    name: String,
    priority: i32,
}

impl ThreadBuilder {
    /// Creates a new thread builder for thread `name` at [`PRI_DEFAULT`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: PRI_DEFAULT,
        }
    }

    /// Sets the initial priority. Out-of-range priorities are a caller bug
    /// and abort at spawn.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Spawns the thread. The new thread is a child of the caller and can be
    /// collected exactly once with [`Kernel::wait`].
    pub fn spawn<F>(self, kernel: &Kernel, f: F) -> Tid
    where
        F: FnOnce(&Kernel) + Send + 'static,
    {
        kernel.spawn_inner(self.name, self.priority, f)
    }
}

/// Body of a spawned host thread: binds the execution context, waits for the
/// first dispatch, runs the thread function, and exits the kernel thread when
/// the function returns (or unwinds through [`Kernel::exit`]).
fn run_thread<F>(kernel: Kernel, tid: Tid, parker: Parker, f: F)
where
    F: FnOnce(&Kernel) + Send + 'static,
{
    context::install(parker);
    {
        let mut g = kernel.sched();
        g.threads
            .get_mut(&tid)
            .expect("spawned thread record missing")
            .host = Some(std::thread::current().id());
    }
    wait_for_dispatch(&kernel, tid);

    match catch_unwind(AssertUnwindSafe(|| f(&kernel))) {
        Ok(()) => kernel.do_exit(0),
        Err(payload) if payload.is::<ExitToken>() => {}
        Err(_) => {
            // A crashed thread surfaces to its parent only as status -1.
            log::error!("thread {} panicked", tid);
            kernel.do_exit(-1);
        }
    }
}

fn wait_for_dispatch(kernel: &Kernel, tid: Tid) {
    loop {
        context::park();
        let g = kernel.sched();
        if g.current == tid {
            return;
        }
        drop(g);
    }
}

/// The idle thread. Runs only when the ready queue is empty.
///
/// When nothing is runnable but threads are sleeping, idle drives the timer
/// forward; the wakeup scan then unblocks the sleepers and idle yields to
/// them. If nothing is runnable *and* nothing is sleeping, no future event
/// can unblock anyone.
fn idle_loop(kernel: Kernel, tid: Tid, parker: Parker) {
    context::install(parker);
    {
        let mut g = kernel.sched();
        g.threads
            .get_mut(&tid)
            .expect("idle thread record missing")
            .host = Some(std::thread::current().id());
    }
    loop {
        let mut g = kernel.sched();
        if g.current != tid {
            drop(g);
            context::park();
            continue;
        }
        if !g.ready.is_empty() {
            g.threads.get_mut(&tid).expect("idle thread vanished").state = ThreadState::Ready;
            let g = kernel.schedule(g);
            drop(g);
        } else if g.sleepers.is_empty() {
            panic!("deadlock: every thread is blocked and no timer wakeup is pending");
        } else {
            drop(g);
            kernel.timer_interrupt();
        }
    }
}
