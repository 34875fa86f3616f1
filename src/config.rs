//! Tunable knobs for a job tree.
//!
//! A plain `Clone + Debug` struct with a `Default` impl, constructed
//! directly or via [`JobConfigBuilder`] when validation is needed.

use crate::error::JobConfigError;

/// How an uncaught panic inside a completion/cancellation listener is
/// handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerPanicPolicy {
    /// Capture the panic as a [`crate::error::CompletionHandlerException`]
    /// and continue notifying the remaining listeners (default).
    Capture,
    /// Resume unwinding on the notifying thread, aborting the traversal.
    Propagate,
}

/// Configuration applied when constructing a [`crate::job::Job`].
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Number of CAS-loop spins attempted before the retrying thread yields
    /// (`std::thread::yield_now`). Purely a contention-tuning knob; no
    /// transition correctness depends on this value.
    pub cas_spin_limit: u32,
    /// Policy for listener panics, see [`ListenerPanicPolicy`].
    pub listener_panic_policy: ListenerPanicPolicy,
    /// Message used for `cancel()` calls and internal default cancellations
    /// that don't supply one.
    pub default_cancel_message: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            cas_spin_limit: 64,
            listener_panic_policy: ListenerPanicPolicy::Capture,
            default_cancel_message: "Job was cancelled".to_string(),
        }
    }
}

impl JobConfig {
    pub fn builder() -> JobConfigBuilder {
        JobConfigBuilder::new()
    }
}

/// Validating builder for [`JobConfig`].
#[derive(Debug, Clone, Default)]
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: JobConfig::default(),
        }
    }

    pub fn cas_spin_limit(mut self, limit: u32) -> Self {
        self.config.cas_spin_limit = limit;
        self
    }

    pub fn listener_panic_policy(mut self, policy: ListenerPanicPolicy) -> Self {
        self.config.listener_panic_policy = policy;
        self
    }

    pub fn default_cancel_message(mut self, message: impl Into<String>) -> Self {
        self.config.default_cancel_message = message.into();
        self
    }

    pub fn build(self) -> Result<JobConfig, JobConfigError> {
        if self.config.cas_spin_limit < 1 {
            return Err(JobConfigError::CasSpinLimitTooLow(self.config.cas_spin_limit));
        }
        Ok(self.config)
    }
}
