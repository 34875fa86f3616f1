//! The customization vtable a job's behavior is built from.
//!
//! Rather than a class hierarchy, the core `Job` holds a single
//! `Arc<dyn JobHooks>` supplied at construction. A plain job, a supervisor,
//! and a deferred value all share the same state machine and differ only
//! in which hooks they install — `PlainHooks` here and `SupervisorHooks` in
//! `supervisor.rs` are the two vtables this crate ships.

use crate::error::{CompletionHandlerException, JobError};

/// Callbacks the job state machine invokes into user/subclass code.
pub trait JobHooks: Send + Sync {
    /// Called exactly once when `start()` performs the empty/inactive →
    /// active transition.
    fn on_start(&self) {}

    /// Called exactly once, the first time the job enters the cancelling
    /// phase — either while still processing `cancel()`, or, if that never
    /// happened, right before finalization on a successful completion.
    fn on_cancelling(&self, _cause: Option<&JobError>) {}

    /// Called once, after the final state has been decided but before the
    /// terminal CAS.
    fn on_completion_internal(&self, _final_cause: Option<&JobError>) {}

    /// Offered a failure that reached the top without a parent willing to
    /// take responsibility for it. Return `true` if this hook reported it
    /// somewhere (so the job can mark it "handled"); the default reports
    /// nothing and returns `false`.
    fn handle_job_exception(&self, _cause: &JobError) -> bool {
        false
    }

    /// A "scoped" job never reports to a parent handler — the enclosing
    /// scope rethrows instead.
    fn is_scoped_coroutine(&self) -> bool {
        false
    }

    /// Pure job-like primitives with no body of their own treat
    /// cancellation as completion: `cancel()` drives straight to a
    /// terminal state instead of merely entering the cancelling phase.
    fn on_cancel_complete(&self) -> bool {
        false
    }

    /// A supervisor does not transition to cancelling when a non-supervisor
    /// child fails.
    fn is_supervisor(&self) -> bool {
        false
    }

    /// What to do when a listener panics while being notified. The default
    /// is a no-op; `Job` itself decides whether to capture or propagate via
    /// `JobConfig::listener_panic_policy`, calling this hook only on the
    /// capture path so a caller can still observe it (for logging, say).
    fn handle_on_completion_exception(&self, _exception: &CompletionHandlerException) {}
}

/// The vtable used when no customization is needed: a plain job with no
/// special parent-propagation behavior.
///
/// This crate never runs a job's "body" on its behalf — there is no bundled
/// executor to drive a `complete()` call once cancellation is requested — so
/// a plain job is always the "no body" kind the design note describes:
/// `on_cancel_complete` returns `true`, meaning `cancel()` alone drives a
/// job all the way to a terminal state instead of leaving it parked in the
/// cancelling phase waiting for a `complete()` that would never otherwise
/// come.
#[derive(Debug, Default)]
pub struct PlainHooks;

impl JobHooks for PlainHooks {
    fn on_cancel_complete(&self) -> bool {
        true
    }
}
