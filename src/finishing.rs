//! The finishing record: the mutable aggregate a job carries while it is in
//! the `Finishing` state — the set of accumulated exceptions, the root
//! cause, the `completing` flag, and the sealed terminal marker.

use crate::error::JobError;
use crate::listener::ListenerList;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    root_cause: Option<JobError>,
    suppressed: Vec<JobError>,
    sealed: bool,
}

/// Mutation of `root_cause`/`suppressed`/`sealed` is always serialized on
/// `inner`'s mutex; `completing` and `finalizing` are standalone atomics,
/// because each needs its own false-to-true-exactly-once CAS independent of
/// exception bookkeeping.
pub struct FinishingRecord {
    pub list: Arc<ListenerList>,
    completing: AtomicBool,
    cancelling: AtomicBool,
    finalizing: AtomicBool,
    inner: Mutex<Inner>,
}

impl FinishingRecord {
    /// Start a fresh record transitioning into cancelling with `cause`, or
    /// with no cause yet (a job can enter `Finishing` via `makeCompleting`
    /// before anything has cancelled it).
    pub fn new(list: Arc<ListenerList>, root_cause: Option<JobError>) -> Self {
        let cancelling = root_cause.is_some();
        Self {
            list,
            completing: AtomicBool::new(false),
            cancelling: AtomicBool::new(cancelling),
            finalizing: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                root_cause,
                suppressed: Vec::new(),
                sealed: false,
            }),
        }
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        let guard = self.inner.lock().expect("finishing record mutex poisoned");
        guard.sealed
    }

    pub fn root_cause(&self) -> Option<JobError> {
        let guard = self.inner.lock().expect("finishing record mutex poisoned");
        guard.root_cause.clone()
    }

    /// Claim the completing flag. Only the caller that flips it false→true
    /// proceeds to finalize; every later caller gets `false`.
    pub fn try_start_completing(&self) -> bool {
        self.completing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_completing(&self) -> bool {
        self.completing.load(Ordering::Acquire)
    }

    /// Multiple child-completion callbacks can race to discover "no
    /// children left" at once; only the one that wins this claim actually
    /// runs `finalize_finishing_state`, so the single terminal CAS is never
    /// attempted twice.
    pub fn try_start_finalizing(&self) -> bool {
        self.finalizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record `cause` as a cancellation exception. If the record is already
    /// sealed, returns `Err(())` — too late, the record has already been
    /// finalized. Otherwise returns `Ok(became_cancelling)`, where `became_cancelling`
    /// is `true` exactly when this call was the one that first put the
    /// record into the cancelling phase (used to decide whether the caller
    /// must run cancellation notifications).
    pub fn add_exception(&self, cause: JobError) -> Result<bool, ()> {
        let mut guard = self.inner.lock().expect("finishing record mutex poisoned");
        if guard.sealed {
            return Err(());
        }
        if guard.root_cause.is_none() {
            guard.root_cause = Some(cause);
            self.cancelling.store(true, Ordering::Release);
            return Ok(true);
        }
        let already_present = guard
            .root_cause
            .as_ref()
            .is_some_and(|r| r.is_same_as(&cause))
            || guard.suppressed.iter().any(|e| e.is_same_as(&cause));
        if !already_present {
            guard.suppressed.push(cause);
        }
        Ok(false)
    }

    /// Seal the record and return the full ordered exception list:
    /// root cause first, then suppressed in accumulation order, then
    /// `proposed` appended if it is distinct from everything already
    /// present. Must be called at most once (the caller — `Job`'s
    /// `finalize_finishing_state` — only reaches this after winning
    /// `try_start_completing`, so there is exactly one sealer).
    pub fn seal(&self, proposed: Option<&JobError>) -> Vec<JobError> {
        let mut guard = self.inner.lock().expect("finishing record mutex poisoned");
        debug_assert!(!guard.sealed, "seal() called twice on one FinishingRecord");
        guard.sealed = true;

        let mut out = Vec::with_capacity(guard.suppressed.len() + 2);
        if let Some(root) = &guard.root_cause {
            out.push(root.clone());
        }
        out.extend(guard.suppressed.iter().cloned());
        if let Some(p) = proposed {
            let dup = out.iter().any(|e| e.is_same_as(p));
            if !dup {
                out.push(p.clone());
            }
        }
        out
    }
}
