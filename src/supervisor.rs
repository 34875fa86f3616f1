//! Supervisor hook vtable.
//!
//! A supervisor reports itself as `is_supervisor() == true`; `Job`'s
//! child-failure handling reads that flag and, for a non-cancellation
//! cause, ignores it without cancelling itself — so a failing child never
//! takes its siblings down with it.

use crate::hooks::JobHooks;

#[derive(Debug, Default)]
pub struct SupervisorHooks;

impl JobHooks for SupervisorHooks {
    fn is_supervisor(&self) -> bool {
        true
    }

    fn on_cancel_complete(&self) -> bool {
        true
    }
}
