//! End-to-end scenarios exercising a job tree the way a caller actually
//! would: start real jobs, spawn real threads, and block on `join`/`await`
//! rather than poking at internal state directly.

use jobtree::{join, join_cancellable, Awaited, Job, JobError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn handler_fires_once() {
    let job = Job::root();
    job.start();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    job.invoke_on_completion(false, true, move |_cause| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert!(job.cancel(None));
    assert!(!job.is_active());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    assert!(!job.cancel(None));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn many_handlers_with_dispose() {
    let job = Job::root();
    job.start();
    let fired = Arc::new(Mutex::new(vec![false; 100]));
    let handles: Vec<_> = (0..100)
        .map(|i| {
            let fired = fired.clone();
            job.invoke_on_completion(false, true, move |_| {
                fired.lock().unwrap()[i] = true;
            })
        })
        .collect();

    for (i, h) in handles.iter().enumerate() {
        if i % 4 == 0 || i % 4 == 1 {
            h.dispose();
        }
    }

    join::cancel_and_join(&job, None);

    let fired = fired.lock().unwrap();
    for (i, f) in fired.iter().enumerate() {
        let disposed = i % 4 == 0 || i % 4 == 1;
        assert_eq!(*f, !disposed, "index {i}");
    }
}

#[test]
fn child_cancellation_on_parent_cancel() {
    let parent = Job::root();
    parent.start();
    let child = Job::child_of(&parent);
    child.start();

    let ran_cleanup = Arc::new(AtomicUsize::new(0));
    let ran_cleanup2 = ran_cleanup.clone();
    child.invoke_on_completion(true, true, move |_cause| {
        // the child's "finally block": must run before the parent's join
        // returns, since the parent cannot complete until the child does.
        thread::sleep(Duration::from_millis(5));
        ran_cleanup2.fetch_add(1, Ordering::SeqCst);
    });

    let p2 = parent.clone();
    let handle = thread::spawn(move || {
        p2.cancel(None);
    });
    handle.join().unwrap();
    join::join(&parent);

    assert_eq!(ran_cleanup.load(Ordering::SeqCst), 1);
    assert!(child.is_cancelled());
}

#[test]
fn child_failure_cancels_parent() {
    let parent = Job::root();
    parent.start();
    let child = Job::child_of(&parent);
    child.start();

    assert!(child.complete_exceptionally(JobError::failure("boom")));
    assert!(parent.is_cancelled());
}

#[test]
fn supervisor_ignores_child_failure() {
    let parent = Job::supervisor();
    parent.start();
    let child = Job::child_of(&parent);
    child.start();

    assert!(child.complete_exceptionally(JobError::failure("boom")));
    assert!(!parent.is_cancelled());
}

#[test]
fn attach_to_cancelled_parent() {
    let parent = Job::root();
    parent.start();
    parent.cancel(None);

    let child = Job::child_of(&parent);
    assert!(!child.is_active());
    assert!(child.is_cancelled());
}

#[test]
fn exception_in_listener_is_captured_and_reported() {
    let job = Job::root();
    job.start();

    let other_fired = Arc::new(AtomicUsize::new(0));
    let other_fired2 = other_fired.clone();

    job.invoke_on_completion(false, true, |_cause| {
        panic!("listener blew up");
    });
    job.invoke_on_completion(false, true, move |_cause| {
        other_fired2.fetch_add(1, Ordering::SeqCst);
    });

    job.cancel(None);
    assert_eq!(other_fired.load(Ordering::SeqCst), 1);
}

#[test]
fn join_cancellable_unblocks_on_waiter_cancellation_across_threads() {
    let job = Job::root();
    job.start();
    let waiter = Job::root();
    waiter.start();

    let w = waiter.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(15));
        w.cancel(None);
    });

    match join_cancellable(&job, &waiter) {
        Awaited::WaiterCancelled(cause) => assert!(cause.is_cancellation()),
        Awaited::Completed(_) => panic!("job was never completed; expected waiter cancellation"),
    }
    handle.join().unwrap();
    assert!(job.is_active());
}

#[test]
fn deep_tree_cancellation_reaches_every_descendant() {
    let root = Job::root();
    root.start();

    let mut leaves = Vec::new();
    let mut cursor = root.clone();
    for _ in 0..5 {
        let child = Job::child_of(&cursor);
        child.start();
        leaves.push(child.clone());
        cursor = child;
    }

    root.cancel(None);
    for leaf in &leaves {
        assert!(leaf.is_cancelled());
    }
}
