//! Blocking `join`/`await` suspension adapters.
//!
//! This crate has no bundled async executor, so the concrete suspension
//! primitive it provides is a blocking rendezvous built on
//! `crossbeam_channel`, the same channel crate used for actor mailboxes
//! elsewhere in this codebase. `join`/`await` register a one-shot
//! completion listener that sends on a bounded(1) channel; the calling
//! thread blocks on `recv()`.
//!
//! If a `waiter` job is supplied, the wait is cancellable: a second
//! listener is registered on the waiter for its cancelling phase, and
//! whichever of the two fires first wins the race, disposing the other's
//! registration (so at most one is ever left dangling).

use crate::error::JobError;
use crate::job::Job;

use crossbeam_channel::bounded;
use std::sync::Arc;

/// Outcome of a cancellable suspension.
pub enum Awaited {
    /// The target job completed; carries its cause (`None` on success).
    Completed(Option<JobError>),
    /// The waiter job was cancelled before the target completed.
    WaiterCancelled(JobError),
}

/// Block the calling thread until `job` reaches a terminal state.
/// Starts `job` first if it has not been started.
pub fn join(job: &Arc<Job>) {
    job.start();
    if job.is_completed() {
        return;
    }
    let (tx, rx) = bounded::<()>(1);
    let handle = job.invoke_on_completion(false, true, move |_cause| {
        let _ = tx.send(());
    });
    let _ = rx.recv();
    handle.dispose();
}

/// Block the calling thread until `job` reaches a terminal state, then
/// return its cause (`None` on normal completion, `Some` on failure or
/// cancellation). The core `Job` carries no value; [`crate::deferred::Deferred`]
/// layers a typed value on top.
pub fn await_job(job: &Arc<Job>) -> Option<JobError> {
    job.start();
    if job.is_completed() {
        return job.completion_cause();
    }
    let (tx, rx) = bounded::<Option<JobError>>(1);
    let handle = job.invoke_on_completion(false, true, move |cause| {
        let _ = tx.send(cause.cloned());
    });
    let result = rx.recv().ok().flatten();
    handle.dispose();
    result
}

/// Cancellable variant: also unblocks if `waiter` gets cancelled first.
pub fn join_cancellable(job: &Arc<Job>, waiter: &Arc<Job>) -> Awaited {
    job.start();
    if job.is_completed() {
        return Awaited::Completed(job.completion_cause());
    }

    let (tx, rx) = bounded::<Awaited>(2);

    let tx_done = tx.clone();
    let done_handle = job.invoke_on_completion(false, true, move |cause| {
        let _ = tx_done.send(Awaited::Completed(cause.cloned()));
    });

    let tx_cancel = tx.clone();
    let cancel_handle = waiter.invoke_on_completion(true, true, move |cause| {
        if let Some(c) = cause {
            let _ = tx_cancel.send(Awaited::WaiterCancelled(c.clone()));
        }
    });

    let outcome = rx.recv().unwrap_or(Awaited::Completed(None));
    done_handle.dispose();
    cancel_handle.dispose();
    outcome
}

/// Cancel `job` with `cause`, then block until it actually reaches a
/// terminal state (cancellation is asynchronous: children may still be
/// unwinding).
pub fn cancel_and_join(job: &Arc<Job>, cause: Option<JobError>) {
    job.cancel(cause);
    join(job);
}
