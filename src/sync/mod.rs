//! Blocking synchronization primitives.
//!
//! Three primitives, layered the classic way: the [`Semaphore`] is the base
//! mechanism (a counter plus a priority-aware wait list), the [`Lock`] is a
//! binary semaphore with an owner and priority donation, and the [`Condvar`]
//! parks each waiter on its own private semaphore so that signal can pick the
//! highest-priority one.
//!
//! All three are handles into the kernel's scheduler state, so they are cheap
//! to clone and share between threads of the same [`crate::Kernel`]. None of
//! them ever spin: a thread that cannot proceed is blocked and consumes no
//! CPU until the primitive releases it.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
