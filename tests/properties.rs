//! Property-based coverage for the job tree's ordering and completion
//! guarantees, plus deterministic tests for the properties that don't lend
//! themselves to random generation (panic capture, the state taxonomy).

use jobtree::{Job, JobError};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

proptest! {
    /// Every listener registered before `cancel()` fires exactly once with a
    /// non-null cause, regardless of how many listeners there are.
    #[test]
    fn every_listener_fires_once_on_cancel(n in 0usize..64) {
        let job = Job::root();
        job.start();
        let fired = Arc::new(Mutex::new(vec![0usize; n]));
        for i in 0..n {
            let fired = fired.clone();
            job.invoke_on_completion(false, true, move |cause| {
                assert!(cause.is_some());
                fired.lock().unwrap()[i] += 1;
            });
        }
        job.cancel(None);
        let fired = fired.lock().unwrap();
        prop_assert!(fired.iter().all(|&count| count == 1));
    }

    /// Registrations made before a normal `complete()` each fire exactly
    /// once with no cause.
    #[test]
    fn every_listener_fires_once_on_normal_completion(n in 0usize..64) {
        let job = Job::root();
        job.start();
        let fired = Arc::new(Mutex::new(vec![0usize; n]));
        for i in 0..n {
            let fired = fired.clone();
            job.invoke_on_completion(false, true, move |_cause| {
                fired.lock().unwrap()[i] += 1;
            });
        }
        job.complete();
        let fired = fired.lock().unwrap();
        prop_assert!(fired.iter().all(|&count| count == 1));
    }

    /// A parent never reports completed before every one of its attached
    /// children does, for any number of children and any completion order.
    #[test]
    fn parent_completion_waits_for_all_children(
        n in 1usize..8,
        order in prop::collection::vec(0usize..8, 1..8),
    ) {
        let parent = Job::root();
        parent.start();
        let children: Vec<_> = (0..n)
            .map(|_| {
                let c = Job::child_of(&parent);
                c.start();
                c
            })
            .collect();

        parent.complete();
        prop_assert!(!parent.is_completed());

        for &idx in &order {
            if idx < children.len() {
                children[idx].complete();
            }
        }
        for c in &children {
            c.complete();
        }

        prop_assert!(parent.is_completed());
        prop_assert!(children.iter().all(|c| c.is_completed()));
    }

    /// Cancelling a parent eventually cancels every descendant, however
    /// deep the tree and regardless of branching factor.
    #[test]
    fn cancel_reaches_every_descendant(depth in 1usize..6, breadth in 1usize..4) {
        let root = Job::root();
        root.start();
        let mut frontier = vec![root.clone()];
        let mut all = vec![root.clone()];
        for _ in 0..depth {
            let mut next = Vec::new();
            for parent in &frontier {
                for _ in 0..breadth {
                    let child = Job::child_of(parent);
                    child.start();
                    all.push(child.clone());
                    next.push(child);
                }
            }
            frontier = next;
        }

        root.cancel(None);
        prop_assert!(all.iter().all(|j| j.is_cancelled()));
    }
}

/// Disposing before the phase fires prevents invocation; disposing after
/// does nothing (not worth randomizing, the two branches are exhaustive).
#[test]
fn dispose_before_and_after_phase() {
    let job = Job::root();
    job.start();

    let before = Arc::new(AtomicUsize::new(0));
    let b = before.clone();
    let h_before = job.invoke_on_completion(false, true, move |_| {
        b.fetch_add(1, Ordering::SeqCst);
    });
    h_before.dispose();

    let after = Arc::new(AtomicUsize::new(0));
    let a = after.clone();
    let h_after = job.invoke_on_completion(false, true, move |_| {
        a.fetch_add(1, Ordering::SeqCst);
    });

    job.cancel(None);
    h_after.dispose();

    assert_eq!(before.load(Ordering::SeqCst), 0);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

/// A handler registered with invoke_immediately on an already-terminal job
/// fires synchronously, exactly once, before invoke_on_completion returns.
#[test]
fn invoke_immediately_on_terminal_job_fires_synchronously() {
    let job = Job::root();
    job.start();
    job.complete_exceptionally(JobError::failure("already done"));

    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    let disposable = job.invoke_on_completion(false, true, move |cause| {
        assert!(cause.is_some());
        f.fetch_add(1, Ordering::SeqCst);
    });
    // already fired synchronously inside invoke_on_completion above
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    disposable.dispose();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// A supervisor parent never transitions to cancelling over a
/// non-supervisor child's failure.
#[test]
fn supervisor_never_cancels_on_child_failure() {
    let parent = Job::supervisor();
    parent.start();
    for _ in 0..10 {
        let child = Job::child_of(&parent);
        child.start();
        child.complete_exceptionally(JobError::failure("x"));
        assert!(!parent.is_cancelled());
    }
}

/// Attaching a child after cancellation but before terminal notifies it
/// immediately, and the parent still awaits it before its own finalization.
#[test]
fn attach_after_cancel_before_terminal_is_notified_and_awaited() {
    let parent = Job::root();
    parent.start();
    let first_child = Job::child_of(&parent);
    first_child.start();

    parent.cancel(None);
    assert!(!parent.is_completed());

    let late_child = Job::child_of(&parent);
    assert!(late_child.is_cancelled());

    assert!(!parent.is_completed());
    first_child.complete();
    late_child.complete_exceptionally(JobError::cancelled("late child done"));
    assert!(parent.is_completed());
}

/// Concurrent cancel() and complete() on the same job never produce a state
/// outside the documented taxonomy, and is_cancelled() reflects whether a
/// cancel was accepted.
#[test]
fn concurrent_cancel_and_complete_converge_to_one_terminal_state() {
    use std::thread;

    for _ in 0..50 {
        let job = Job::root();
        job.start();
        let j1 = job.clone();
        let j2 = job.clone();
        let h1 = thread::spawn(move || {
            j1.cancel(None);
        });
        let h2 = thread::spawn(move || {
            j2.complete();
        });
        h1.join().unwrap();
        h2.join().unwrap();

        assert!(job.is_completed());
        if job.is_cancelled() {
            assert!(job.cancellation_cause().is_some());
        } else {
            assert!(job.completion_cause().is_none());
        }
    }
}
