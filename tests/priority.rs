//! Priority scheduling: preemption, ordering, and the thread lifecycle.

mod common;

use common::Journal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teos::{Kernel, KernelError, SchedPolicy, ThreadBuilder, ThreadState, PRI_DEFAULT};

#[test]
fn higher_priority_thread_preempts_at_creation() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let journal = Journal::new();

    let j = journal.clone();
    let hi = ThreadBuilder::new("hi").priority(40).spawn(&kernel, move |_| {
        j.push("hi ran");
    });
    journal.push("spawn returned");

    assert_eq!(kernel.wait(hi), Ok(0));
    assert_eq!(journal.entries(), ["hi ran", "spawn returned"]);
}

#[test]
fn lower_priority_thread_does_not_preempt() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let journal = Journal::new();

    let j = journal.clone();
    let lo = ThreadBuilder::new("lo").priority(20).spawn(&kernel, move |_| {
        j.push("lo ran");
    });
    assert!(journal.entries().is_empty());

    assert_eq!(kernel.wait(lo), Ok(0));
    assert_eq!(journal.entries(), ["lo ran"]);
}

#[test]
fn round_robin_is_fifo_among_equal_priorities() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    kernel.set_priority(63);
    let journal = Journal::new();

    let mut children = Vec::new();
    for name in ["a", "b", "c"] {
        let j = journal.clone();
        children.push(
            ThreadBuilder::new(name)
                .priority(40)
                .spawn(&kernel, move |_| j.push(name)),
        );
    }
    assert!(journal.entries().is_empty());

    // Dropping below the children lets all three run, in creation order.
    kernel.set_priority(0);
    assert_eq!(journal.entries(), ["a", "b", "c"]);

    for child in children {
        assert_eq!(kernel.wait(child), Ok(0));
    }
}

#[test]
fn yield_keeps_running_while_highest() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let ran = Arc::new(AtomicBool::new(false));

    let r = ran.clone();
    let child = ThreadBuilder::new("lo").priority(10).spawn(&kernel, move |_| {
        r.store(true, Ordering::SeqCst);
    });

    kernel.yield_now();
    assert!(!ran.load(Ordering::SeqCst));

    // Lowering below the child yields to it immediately.
    kernel.set_priority(5);
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn reclamation_is_deferred_past_exit() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let child = ThreadBuilder::new("short").priority(20).spawn(&kernel, |_| {});

    assert_eq!(kernel.state_of(child), Ok(ThreadState::Ready));
    assert_eq!(kernel.wait(child), Ok(0));
    // Exited, but the record is freed only at the next context switch.
    assert_eq!(kernel.state_of(child), Ok(ThreadState::Dying));
    kernel.yield_now();
    assert_eq!(kernel.state_of(child), Err(KernelError::NoSuchEntry));
}

#[test]
fn thread_identity() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    assert_eq!(kernel.thread_name(), "main");
    assert_eq!(kernel.get_priority(), PRI_DEFAULT);

    let main_tid = kernel.current();
    let child = ThreadBuilder::new("worker").priority(40).spawn(&kernel, move |k| {
        assert_eq!(k.thread_name(), "worker");
        assert_eq!(k.get_priority(), 40);
        assert_ne!(k.current(), main_tid);
    });
    assert_ne!(child, main_tid);
    assert_eq!(kernel.wait(child), Ok(0));
    assert_eq!(kernel.current(), main_tid);
}

#[test]
#[should_panic(expected = "priority 64 out of range")]
fn spawn_priority_out_of_range_panics() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    ThreadBuilder::new("bad").priority(64).spawn(&kernel, |_| {});
}

#[test]
#[should_panic(expected = "priority -1 out of range")]
fn set_priority_out_of_range_panics() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    kernel.set_priority(-1);
}
