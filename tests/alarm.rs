//! Timer sleep and wakeup.

mod common;

use common::Journal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teos::{Kernel, SchedPolicy, ThreadBuilder, ThreadState};

#[test]
fn sleeper_wakes_on_the_exact_tick() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let woke = Arc::new(AtomicBool::new(false));

    let w = woke.clone();
    let child = ThreadBuilder::new("sleeper").priority(40).spawn(&kernel, move |k| {
        k.sleep(5);
        w.store(true, Ordering::SeqCst);
    });

    assert_eq!(kernel.state_of(child), Ok(ThreadState::Blocked));
    assert_eq!(kernel.wakeup_tick_of(child), Some(5));

    kernel.run_ticks(4);
    assert!(!woke.load(Ordering::SeqCst));
    kernel.timer_interrupt();
    assert!(woke.load(Ordering::SeqCst));
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn simultaneous_wakeups_run_in_priority_order() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let journal = Journal::new();

    let mut children = Vec::new();
    for (name, priority) in [("s40", 40), ("s45", 45)] {
        let j = journal.clone();
        children.push(ThreadBuilder::new(name).priority(priority).spawn(
            &kernel,
            move |k| {
                k.sleep(3);
                j.push(name);
            },
        ));
    }

    kernel.run_ticks(3);
    assert_eq!(journal.entries(), ["s45", "s40"]);
    for child in children {
        assert_eq!(kernel.wait(child), Ok(0));
    }
}

#[test]
fn idle_thread_advances_time_when_everyone_sleeps() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let journal = Journal::new();
    let t0 = kernel.ticks();

    let j = journal.clone();
    let child = ThreadBuilder::new("sleeper").priority(40).spawn(&kernel, move |k| {
        k.sleep(3);
        j.push("child");
    });

    // With every thread asleep, idle drives the clock forward itself.
    kernel.sleep(3);
    journal.push("main");

    assert_eq!(kernel.elapsed(t0), 3);
    assert_eq!(kernel.stats().idle_ticks, 3);
    assert_eq!(journal.entries(), ["child", "main"]);
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn sub_tick_sleeps_yield_instead_of_blocking() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let done = Arc::new(AtomicBool::new(false));

    let d = done.clone();
    let child = ThreadBuilder::new("napper").priority(40).spawn(&kernel, move |k| {
        // Both round down to zero ticks at 100 ticks per second.
        k.usleep(100);
        k.nsleep(500);
        d.store(true, Ordering::SeqCst);
    });

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(kernel.ticks(), 0);
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn msleep_converts_to_ticks() {
    let kernel = Kernel::new(SchedPolicy::Priority);

    let child = ThreadBuilder::new("napper").priority(40).spawn(&kernel, move |k| {
        let before = k.ticks();
        // 20 ms at 100 Hz is 2 ticks.
        k.msleep(20);
        assert_eq!(k.elapsed(before), 2);
    });

    assert_eq!(kernel.state_of(child), Ok(ThreadState::Blocked));
    kernel.run_ticks(2);
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn tick_accounting() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    kernel.run_ticks(10);

    let stats = kernel.stats();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.kernel_ticks, 10);
    assert_eq!(stats.idle_ticks, 0);
}
