//! Named locks: reentrancy, release and contention across instances

use crate::common::*;
use foliodb::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn nested_synchronized_on_same_name_runs_inner_body() {
    let t = TestStore::new();

    let depth = t
        .store
        .synchronized(["x"], || {
            t.store.synchronized(["x"], || {
                t.store.synchronized(["x", "y", "x"], || Ok(3))
            })
        })
        .unwrap();

    assert_eq!(depth, 3);
    assert!(!t.store.locks().is_held("x"));
    assert!(!t.store.locks().is_held("y"));
}

#[test]
fn save_from_inside_a_save_handler_does_not_deadlock() {
    let t = TestStore::new();
    let store = t.handle();
    let weak = Arc::downgrade(&store);
    store
        .on(
            "saved",
            move |event: &Event<'_>| {
                let (Some(store), Some(id)) = (weak.upgrade(), event.id) else {
                    return Ok(());
                };
                if id.as_str() == "parent" {
                    // same id lock again, plus a different record
                    store.save("parent-audit", &json!({"seen": true}))?;
                    store.synchronized(["parent"], || Ok(()))?;
                }
                Ok(())
            },
            0,
        )
        .unwrap();

    store.save("parent", &json!({})).unwrap();

    assert_eq!(store.load("parent-audit").unwrap(), Some(json!({"seen": true})));
}

#[test]
fn independent_instances_never_overlap_in_body() {
    let t = TestStore::new();
    const INSTANCES: usize = 4;
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(INSTANCES));

    let handles: Vec<_> = (0..INSTANCES)
        .map(|_| {
            let store = t.reopen();
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..5 {
                    store
                        .synchronized(["critical"], || {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn unrelated_names_do_not_block_each_other() {
    let t = TestStore::new();
    let other = t.reopen();
    let barrier = Arc::new(Barrier::new(2));

    let held = {
        let store = t.handle();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            store
                .synchronized(["left"], || {
                    barrier.wait();
                    // wait until the other instance got through "right"
                    barrier.wait();
                    Ok(())
                })
                .unwrap();
        })
    };

    barrier.wait();
    other.synchronized(["right"], || Ok(())).unwrap();
    barrier.wait();
    held.join().unwrap();
}

#[test]
fn lock_is_released_when_body_fails() {
    let t = TestStore::new();

    let failed: Result<()> = t
        .store
        .synchronized(["fragile"], || Err(Error::Aborted("body failed".into())));
    assert!(failed.is_err());

    // another instance acquires it without waiting on a leaked holder
    let other = t.reopen();
    assert_eq!(other.synchronized(["fragile"], || Ok("free")).unwrap(), "free");
}
