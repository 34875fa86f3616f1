//! `Deferred<T>`: a job that also carries a typed result.
//!
//! The core [`crate::job::Job`] never holds a payload — keeping it
//! non-generic is what lets `ChildHandle`/`ListenerList` stay free of a type
//! parameter. `Deferred<T>` is the thin layer on top: an inner `Job` plus a
//! value cell set exactly once, at the same moment the job transitions to
//! `CompletedNormally`.

use crate::error::JobError;
use crate::hooks::PlainHooks;
use crate::job::Job;
use crate::join;

use std::sync::{Arc, Mutex};

/// A job whose successful completion carries a `T`.
pub struct Deferred<T> {
    job: Arc<Job>,
    value: Mutex<Option<T>>,
}

impl<T> Deferred<T>
where
    T: Send + 'static,
{
    pub fn new(parent: Option<Arc<Job>>) -> Arc<Deferred<T>> {
        Arc::new(Self {
            job: Job::with_hooks(parent, Arc::new(PlainHooks)),
            value: Mutex::new(None),
        })
    }

    /// A deferred value whose underlying job ignores a failing child the
    /// way a [`crate::supervisor::SupervisorHooks`] job does. Not generally
    /// useful on its own (a deferred has no children unless other jobs are
    /// attached to [`Deferred::job`]), but kept as a factory alongside
    /// `Job::supervisor` for symmetry.
    pub fn supervisor(parent: Option<Arc<Job>>) -> Arc<Deferred<T>> {
        Arc::new(Self {
            job: Job::with_hooks(parent, Arc::new(crate::supervisor::SupervisorHooks)),
            value: Mutex::new(None),
        })
    }

    /// The underlying job, so other jobs can be attached as its children
    /// via [`Job::child_of`].
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn start(&self) -> bool {
        self.job.start()
    }

    pub fn is_active(&self) -> bool {
        self.job.is_active()
    }

    pub fn is_completed(&self) -> bool {
        self.job.is_completed()
    }

    /// Store `value` and complete normally. Returns `false` if the job was
    /// already finishing or terminal (the value is dropped in that case).
    pub fn complete(&self, value: T) -> bool {
        {
            let mut guard = self.value.lock().expect("deferred value mutex poisoned");
            *guard = Some(value);
        }
        self.job.complete()
    }

    pub fn complete_exceptionally(&self, cause: JobError) -> bool {
        self.job.complete_exceptionally(cause)
    }

    pub fn cancel(&self, cause: Option<JobError>) -> bool {
        self.job.cancel(cause)
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + 'static,
{
    /// Block the calling thread until the job completes, then return its
    /// value or its cause.
    pub fn await_value(&self) -> Result<T, JobError> {
        match join::await_job(&self.job) {
            Some(cause) => Err(cause),
            None => Ok(self.completed_value()),
        }
    }

    /// The stored value if the job already completed normally; an error
    /// describing why not otherwise (not yet complete, or failed).
    pub fn get_completed(&self) -> Result<T, JobError> {
        if !self.job.is_completed() {
            return Err(JobError::failure("deferred value is not yet complete"));
        }
        if let Some(cause) = self.job.completion_cause() {
            return Err(cause);
        }
        Ok(self.completed_value())
    }

    fn completed_value(&self) -> T {
        self.value
            .lock()
            .expect("deferred value mutex poisoned")
            .clone()
            .expect("job completed normally but no value was ever stored")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_with_value() {
        let d: Arc<Deferred<i32>> = Deferred::new(None);
        d.start();
        assert!(d.complete(42));
        assert_eq!(d.get_completed().unwrap(), 42);
    }

    #[test]
    fn get_completed_before_finish_is_an_error() {
        let d: Arc<Deferred<i32>> = Deferred::new(None);
        d.start();
        assert!(d.get_completed().is_err());
    }

    #[test]
    fn completes_exceptionally_reports_cause() {
        let d: Arc<Deferred<i32>> = Deferred::new(None);
        d.start();
        assert!(d.complete_exceptionally(JobError::failure("boom")));
        let err = d.get_completed().unwrap_err();
        assert!(!err.is_cancellation());
    }

    #[test]
    fn await_value_blocks_until_completion() {
        let d: Arc<Deferred<&'static str>> = Deferred::new(None);
        d.start();
        let d2 = d.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            d2.complete("done");
        });
        assert_eq!(d.await_value().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn child_deferred_is_cancelled_when_parent_cancels() {
        let parent = Job::root();
        parent.start();
        let d: Arc<Deferred<i32>> = Deferred::new(Some(parent.clone()));
        d.start();
        parent.cancel(None);
        assert!(d.job().is_cancelled());
    }

    #[test]
    fn supervisor_deferred_ignores_failing_child_of_its_job() {
        let d: Arc<Deferred<i32>> = Deferred::supervisor(None);
        d.start();
        let child = Job::child_of(d.job());
        child.start();
        assert!(child.complete_exceptionally(JobError::failure("boom")));
        assert!(!d.job().is_cancelled());
    }
}
