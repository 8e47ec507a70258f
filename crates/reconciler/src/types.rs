//! Core types for the reconcilers.

use std::time::Duration;

/// What the manager should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Do nothing until the next change event for the key.
    pub const fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Reconcile the key again after `duration`.
    pub const fn requeue_after(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Requeue delay, if any.
    pub const fn requeue_interval(&self) -> Option<Duration> {
        self.requeue_after
    }
}
