// Space-scoped operations
//
// The session target context is overwritten for the duration of the
// operation and left in place afterwards; callers that need the previous
// target back must set it themselves.

use std::sync::Arc;

use crate::auth::{CredentialStore, TargetContext};
use crate::error::Result;
use crate::executor::RequestExecutor;

/// Runs operations against a caller-supplied space, one at a time
pub struct SpaceGuard {
    store: Arc<CredentialStore>,
    executor: Arc<RequestExecutor>,
}

impl SpaceGuard {
    pub(crate) fn new(store: Arc<CredentialStore>, executor: Arc<RequestExecutor>) -> Self {
        Self { store, executor }
    }

    /// Point the session at `context`, then run `operation`
    ///
    /// Blocks while another space-scoped operation or `set_target_context` is
    /// running. The operation must not call `set_target_context` or
    /// `with_space` itself; the section is not reentrant.
    pub fn with_space<T, F>(&self, context: impl Into<TargetContext>, operation: F) -> Result<T>
    where
        F: FnOnce(&RequestExecutor) -> Result<T>,
    {
        let context = context.into();
        let lease = self.store.lock_context();
        let previous = lease.replace(context);

        tracing::debug!(
            previous_space = ?previous.space_guid(),
            space = ?lease.current().space_guid(),
            "Entered space-scoped operation"
        );

        let result = operation(&self.executor);
        drop(lease);
        result
    }
}
