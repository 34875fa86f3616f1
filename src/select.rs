//! Selectable registration endpoints.
//!
//! A `SelectGuard` is the shared claim token a select-over-many-events
//! primitive would hand to every clause it registers. `on_join`/`on_await`
//! wrap `Job::invoke_on_completion` so that, when the job fires, the clause
//! first tries to claim the guard; if another clause already won the race
//! the notification is simply dropped — "the listener was disposable" is
//! exactly `Disposable`'s existing at-most-once-invocation guarantee, no
//! extra bookkeeping needed.

use crate::error::JobError;
use crate::job::Job;
use crate::listener::Disposable;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared claim token for one logical `select`.
#[derive(Clone)]
pub struct SelectGuard {
    claimed: Arc<AtomicBool>,
}

impl SelectGuard {
    pub fn new() -> Self {
        Self {
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempt to win the race. Only the first caller across all clauses
    /// sharing this guard succeeds.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl Default for SelectGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a selectable `onJoin` clause: fires `on_selected` at most once,
/// and only if this clause wins `guard`.
pub fn on_join<F>(job: &Arc<Job>, guard: SelectGuard, on_selected: F) -> Disposable
where
    F: FnOnce() + Send + 'static,
{
    job.invoke_on_completion(false, true, move |_cause| {
        if guard.try_claim() {
            on_selected();
        }
    })
}

/// Register a selectable `onAwait` clause: fires `on_selected` with the
/// job's terminal cause (`None` on success), at most once, and only if
/// this clause wins `guard`.
pub fn on_await<F>(job: &Arc<Job>, guard: SelectGuard, on_selected: F) -> Disposable
where
    F: FnOnce(Option<JobError>) + Send + 'static,
{
    job.invoke_on_completion(false, true, move |cause| {
        if guard.try_claim() {
            on_selected(cause.cloned());
        }
    })
}
