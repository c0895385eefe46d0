//! # TeOS: a teaching operating-system scheduler core
//!
//! TeOS is the thread scheduler and synchronization core of a small teaching
//! kernel, rehosted as an ordinary library so that every scheduling decision
//! can be driven and observed from tests. The kernel proper is reduced to the
//! parts where the interesting reasoning lives:
//!
//! - the thread control block lifecycle and the Ready/Running/Blocked/Dying
//!   state machine ([`thread`]),
//! - priority-based preemptive scheduling with transitive priority donation,
//!   and the multi-level-feedback-queue (MLFQS) alternative
//!   ([`thread::scheduler`]),
//! - the blocking primitives threads wait on: semaphore, lock, condition
//!   variable ([`sync`]),
//! - tick counting, per-thread sleep/wakeup and preemption timing ([`timer`]),
//! - parent/child wait-exactly-once coordination ([`process`]),
//! - the 17.14 fixed-point arithmetic behind the MLFQS decay math
//!   ([`fixed_point`]).
//!
//! ## The threading model
//!
//! A [`Kernel`] models a single logical CPU: exactly one kernel thread
//! executes at any instant, and every other thread is parked until the
//! scheduler transfers execution to it. Each kernel thread is carried by a
//! host thread, but the host threads never run concurrently; the execution
//! transfer primitive in `thread::context` guarantees the hand-off.
//!
//! On real hardware the scheduler protects its state by disabling interrupts.
//! Here the whole scheduler state sits behind one mutex, and holding its guard
//! plays the role of "interrupts disabled": it is taken at every entry point,
//! released on every exit path, and held across the context switch itself.
//! External interrupt *context* (the per-tick callback) is modelled
//! separately, see [`interrupt`].
//!
//! ```no_run
//! use teos::{Kernel, SchedPolicy, ThreadBuilder};
//!
//! let kernel = Kernel::new(SchedPolicy::Priority);
//! let child = ThreadBuilder::new("worker").priority(40).spawn(&kernel, |k| {
//!     k.sleep(10);
//! });
//! assert_eq!(kernel.wait(child), Ok(0));
//! ```
//!
//! ## Failure modes
//!
//! Programming-contract violations (releasing a lock not held, re-acquiring a
//! held lock, blocking from interrupt context, unblocking a thread that is not
//! blocked) indicate a caller bug and panic with a diagnostic. Expected
//! runtime outcomes (a `try_down` that would block, waiting on a non-child)
//! are reported through return values and [`KernelError`].

pub mod fixed_point;
pub mod interrupt;
pub mod process;
pub mod sync;
pub mod thread;
pub mod timer;

pub use sync::{Condvar, Lock, Semaphore};
pub use thread::{
    Kernel, SchedPolicy, Stats, ThreadBuilder, ThreadState, Tid, PRI_DEFAULT, PRI_MAX, PRI_MIN,
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// while handling a kernel operation. These are the *expected* failures; a
/// violated kernel invariant panics instead.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such thread, or not a child of the caller. (ENOENT)
    NoSuchEntry,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
}
