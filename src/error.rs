//! Error taxonomy for the job state machine.
//!
//! `JobError` is the single currency that flows through the finishing
//! record, the cancelling-phase listener callbacks, and parent propagation.
//! It is deliberately not `Box<dyn Error>`: the finishing record needs to
//! compare exceptions *by identity* when deduplicating suppressed causes, so
//! every `JobError` wraps an `Arc<JobErrorInner>` and identity is
//! `Arc::ptr_eq` on that pointer. Cloning a `JobError` is therefore O(1) and
//! never duplicates the underlying cause.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Distinguishes the two branches of the error taxonomy.
///
/// A `Cancellation` is a "normal" termination signal: it is never reported
/// as an unhandled exception by [`crate::job::Job::cancel_parent`], and a
/// parent job's `child_cancelled` hook always swallows it silently. A
/// `Failure` is everything else and, absent a supervisor, cancels the
/// parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Cancellation requested with no specific reason (`cancel()` with no
    /// argument, or a parent propagating its own default cancellation).
    Cancellation,
    /// A cancellation carrying extra identity, e.g. a timeout. Two
    /// `Timeout` causes are distinguished by their `Arc` identity even when
    /// their messages are equal.
    Timeout,
    /// Any other error. Causes parent cancellation unless the parent is a
    /// supervisor.
    Failure,
}

impl JobErrorKind {
    /// `true` for both `Cancellation` and `Timeout` — i.e. whether this
    /// kind should be treated as "normal" termination rather than an
    /// unhandled exception.
    pub fn is_cancellation(self) -> bool {
        !matches!(self, JobErrorKind::Failure)
    }
}

struct JobErrorInner {
    kind: JobErrorKind,
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl fmt::Debug for JobErrorInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobErrorInner")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// A job failure or cancellation signal.
///
/// Cheap to clone (`Arc` bump); identity-comparable via [`JobError::is_same_as`].
#[derive(Clone, Debug)]
pub struct JobError(Arc<JobErrorInner>);

impl JobError {
    /// Build a default cancellation cause ("Job was cancelled").
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Cancellation, message, None)
    }

    /// Build a timeout-flavored cancellation cause with its own identity,
    /// distinct from a plain `cancelled()` even with the same message.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Timeout, message, None)
    }

    /// Build a failure cause, optionally wrapping a source error.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Failure, message, None)
    }

    /// Build a failure cause from an arbitrary `std::error::Error`.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let message = err.to_string();
        Self::new(JobErrorKind::Failure, message, Some(Arc::new(err)))
    }

    fn new(
        kind: JobErrorKind,
        message: impl Into<String>,
        source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self(Arc::new(JobErrorInner {
            kind,
            message: message.into(),
            source,
        }))
    }

    pub fn kind(&self) -> JobErrorKind {
        self.0.kind
    }

    pub fn is_cancellation(&self) -> bool {
        self.0.kind.is_cancellation()
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// Identity comparison used by the finishing record to deduplicate
    /// suppressed exceptions. Two `JobError`s built separately — even with
    /// identical kind and message — are never "the same".
    pub fn is_same_as(&self, other: &JobError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            JobErrorKind::Cancellation => write!(f, "cancelled: {}", self.0.message),
            JobErrorKind::Timeout => write!(f, "timed out: {}", self.0.message),
            JobErrorKind::Failure => write!(f, "{}", self.0.message),
        }
    }
}

impl StdError for JobError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

/// Wraps an exception thrown *by* a completion/cancellation listener.
///
/// Never becomes a job's own cause; by default it is routed back to
/// whichever thread drove the notification via
/// [`crate::hooks::JobHooks::handle_on_completion_exception`], which rethrows
/// by default.
#[derive(Debug, Clone)]
pub struct CompletionHandlerException {
    cause: JobError,
}

impl CompletionHandlerException {
    pub fn new(cause: JobError) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &JobError {
        &self.cause
    }
}

impl fmt::Display for CompletionHandlerException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception in completion handler: {}", self.cause)
    }
}

impl StdError for CompletionHandlerException {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.cause)
    }
}

/// Errors raised while building a [`crate::config::JobConfig`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobConfigError {
    #[error("cas_spin_limit must be at least 1, got {0}")]
    CasSpinLimitTooLow(u32),
}
