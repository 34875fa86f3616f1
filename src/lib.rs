//! A lock-free-in-spirit job tree: structured concurrency primitives for a
//! parent/child hierarchy of cancelable, observable units of work.
//!
//! A [`Job`] starts `EmptyNew`/`EmptyActive`, accumulates listeners and
//! children while incomplete, and drives a `Finishing` protocol on its way
//! to a terminal state — `CompletedNormally` or `CompletedExceptionally`.
//! Cancellation propagates down a job's children; unhandled failures
//! propagate up to its parent, unless the parent is a
//! [`supervisor`](Job::supervisor). [`Deferred`] layers a typed result on
//! top of the (intentionally valueless) core `Job`.
//!
//! ```
//! use jobtree::{Job, JobError};
//!
//! let parent = Job::root();
//! parent.start();
//! let child = Job::child_of(&parent);
//! child.start();
//!
//! child.complete_exceptionally(JobError::failure("disk full"));
//! assert!(parent.is_cancelled());
//! ```

pub mod config;
pub mod deferred;
pub mod error;
pub mod finishing;
pub mod hooks;
pub mod id;
pub mod job;
pub mod join;
pub mod listener;
pub mod select;
pub mod supervisor;

pub use config::{JobConfig, JobConfigBuilder, ListenerPanicPolicy};
pub use deferred::Deferred;
pub use error::{CompletionHandlerException, JobConfigError, JobError, JobErrorKind};
pub use hooks::{JobHooks, PlainHooks};
pub use id::JobId;
pub use job::Job;
pub use join::{await_job, cancel_and_join, join, join_cancellable, Awaited};
pub use listener::Disposable;
pub use select::{on_await, on_join, SelectGuard};
pub use supervisor::SupervisorHooks;
