//! Priority donation through locks.

mod common;

use common::Journal;
use teos::sync::Lock;
use teos::{Kernel, SchedPolicy, ThreadBuilder, PRI_DEFAULT};

#[test]
fn blocked_acquirer_donates_to_holder() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);
    let journal = Journal::new();

    lock.acquire();
    let l = lock.clone();
    let j = journal.clone();
    let high = ThreadBuilder::new("high").priority(45).spawn(&kernel, move |k| {
        l.acquire();
        j.push(format!("high acquired at priority {}", k.get_priority()));
        l.release();
    });

    // "high" is blocked on the lock; its priority flows to us.
    assert_eq!(kernel.get_priority(), 45);
    lock.release();
    assert_eq!(kernel.get_priority(), PRI_DEFAULT);

    assert_eq!(kernel.wait(high), Ok(0));
    assert_eq!(journal.entries(), ["high acquired at priority 45"]);
}

#[test]
fn donation_propagates_through_lock_chains() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock_a = Lock::new(&kernel);
    let lock_b = Lock::new(&kernel);

    lock_a.acquire();

    let (a, b) = (lock_a.clone(), lock_b.clone());
    let mid = ThreadBuilder::new("mid").priority(35).spawn(&kernel, move |_| {
        b.acquire();
        a.acquire();
        a.release();
        b.release();
    });
    // "mid" holds B and is blocked on A.
    assert_eq!(kernel.get_priority(), 35);

    let b = lock_b.clone();
    let high = ThreadBuilder::new("high").priority(45).spawn(&kernel, move |_| {
        b.acquire();
        b.release();
    });
    // "high" blocked on B donates through "mid" to us.
    assert_eq!(kernel.get_priority(), 45);

    lock_a.release();
    assert_eq!(kernel.get_priority(), PRI_DEFAULT);
    assert_eq!(kernel.wait(mid), Ok(0));
    assert_eq!(kernel.wait(high), Ok(0));
}

#[test]
fn donation_depth_is_bounded_at_eight_hops() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    kernel.set_priority(0);
    let locks: Vec<Lock> = (0..10).map(|_| Lock::new(&kernel)).collect();
    locks[0].acquire();

    // Each link holds lock k and blocks on lock k-1, so link k's priority
    // must cross k hops to reach us at the root of the chain.
    let mut children = Vec::new();
    for k in 1..=9usize {
        let held = locks[k].clone();
        let awaited = locks[k - 1].clone();
        children.push(
            ThreadBuilder::new(format!("chain{}", k))
                .priority(30 + k as i32)
                .spawn(&kernel, move |_| {
                    held.acquire();
                    awaited.acquire();
                    awaited.release();
                    held.release();
                }),
        );
    }

    // chain8's donation (38) arrives on the eighth hop; chain9's (39) would
    // need a ninth and is cut off.
    assert_eq!(kernel.get_priority(), 38);

    locks[0].release();
    for child in children {
        assert_eq!(kernel.wait(child), Ok(0));
    }
    assert_eq!(kernel.get_priority(), 0);
}

#[test]
fn donation_survives_a_base_priority_change() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);

    lock.acquire();
    let l = lock.clone();
    let high = ThreadBuilder::new("high").priority(45).spawn(&kernel, move |_| {
        l.acquire();
        l.release();
    });
    assert_eq!(kernel.get_priority(), 45);

    // Lowering the base does not shed the active donation.
    kernel.set_priority(20);
    assert_eq!(kernel.get_priority(), 45);

    lock.release();
    assert_eq!(kernel.get_priority(), 20);
    assert_eq!(kernel.wait(high), Ok(0));
}

#[test]
fn try_acquire_neither_blocks_nor_donates() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);
    let journal = Journal::new();

    lock.acquire();
    let l = lock.clone();
    let j = journal.clone();
    let child = ThreadBuilder::new("opportunist")
        .priority(40)
        .spawn(&kernel, move |_| {
            assert!(!l.try_acquire());
            j.push("missed");
        });

    assert_eq!(journal.entries(), ["missed"]);
    assert_eq!(kernel.get_priority(), PRI_DEFAULT);
    lock.release();
    assert_eq!(kernel.wait(child), Ok(0));
}

#[test]
fn try_acquire_takes_a_free_lock() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);

    assert!(lock.try_acquire());
    assert!(lock.held_by_current());
    lock.release();
    assert!(!lock.held_by_current());
}

#[test]
#[should_panic(expected = "releasing a lock it does not hold")]
fn releasing_an_unheld_lock_panics() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);
    lock.release();
}

#[test]
#[should_panic(expected = "acquiring a lock it already holds")]
fn recursive_acquire_panics() {
    let kernel = Kernel::new(SchedPolicy::Priority);
    let lock = Lock::new(&kernel);
    lock.acquire();
    lock.acquire();
}
