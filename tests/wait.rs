//! Thread exit and parent/child wait.

mod common;

use common::Journal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use teos::{Kernel, KernelError, SchedPolicy, ThreadBuilder, Tid};

#[test]
fn wait_returns_the_exit_status() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let child = ThreadBuilder::new("child").priority(40).spawn(&kernel, |k| {
        k.exit(42);
    });

    // The child already exited; the status is collected without blocking.
    assert_eq!(kernel.wait(child), Ok(42));
    // A child can be waited on exactly once.
    assert_eq!(kernel.wait(child), Err(KernelError::NoSuchEntry));
}

#[test]
fn returning_from_the_body_exits_with_zero() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let child = ThreadBuilder::new("child").priority(40).spawn(&kernel, |_| {});
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn wait_blocks_until_the_child_exits() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let journal = Journal::new();

    let j = journal.clone();
    let child = ThreadBuilder::new("slow").priority(20).spawn(&kernel, move |k| {
        j.push("child ran");
        k.exit(7);
    });

    assert!(journal.entries().is_empty());
    assert_eq!(kernel.wait(child), Ok(7));
    assert_eq!(journal.entries(), ["child ran"]);
}

#[test]
fn wait_rejects_non_children() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    assert_eq!(kernel.wait(9999), Err(KernelError::NoSuchEntry));

    // A grandchild is not a child: only its direct parent may collect it.
    let grandchild: Arc<Mutex<Option<Tid>>> = Arc::new(Mutex::new(None));
    let slot = grandchild.clone();
    let child = ThreadBuilder::new("child").priority(40).spawn(&kernel, move |k| {
        let gc = ThreadBuilder::new("grandchild").priority(40).spawn(k, |_| {});
        slot.lock().unwrap().replace(gc);
        assert_eq!(k.wait(gc), Ok(0));
    });
    assert_eq!(kernel.wait(child), Ok(0));

    let gc = grandchild.lock().unwrap().take().unwrap();
    assert_eq!(kernel.wait(gc), Err(KernelError::NoSuchEntry));
}

#[test]
fn orphans_keep_running_after_the_parent_exits() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let ran = Arc::new(AtomicBool::new(false));
    let orphan_tid: Arc<Mutex<Option<Tid>>> = Arc::new(Mutex::new(None));

    let (r, slot) = (ran.clone(), orphan_tid.clone());
    let parent = ThreadBuilder::new("parent").priority(40).spawn(&kernel, move |k| {
        let orphan = ThreadBuilder::new("orphan").priority(20).spawn(k, move |_| {
            r.store(true, Ordering::SeqCst);
        });
        slot.lock().unwrap().replace(orphan);
        k.exit(1);
    });

    assert_eq!(kernel.wait(parent), Ok(1));
    let orphan = orphan_tid.lock().unwrap().take().unwrap();
    // Nobody inherits the orphan, so it cannot be collected...
    assert_eq!(kernel.wait(orphan), Err(KernelError::NoSuchEntry));
    assert!(!ran.load(Ordering::SeqCst));

    // ...but it still gets scheduled and runs to completion.
    kernel.sleep(1);
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn a_crashing_child_reports_failure_status() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let child = ThreadBuilder::new("crasher").priority(40).spawn(&kernel, |_| {
        panic!("induced fault");
    });
    assert_eq!(kernel.wait(child), Ok(-1));
}

#[test]
#[should_panic(expected = "initial thread cannot exit")]
fn the_initial_thread_cannot_exit() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    kernel.exit(0);
}
