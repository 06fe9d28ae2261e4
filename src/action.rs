//! The test action contract and the built-in leaf actions.
//!
//! Every node of a test, container or leaf, implements [`TestAction`].
//! Containers own their children as [`ActionRef`]s so that concurrent
//! containers can hand clones of them to the scheduler.

pub mod builtin;
pub mod invoke;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::TestContext;
use crate::error::ActionResult;

pub use builtin::{
    CreateVariablesAction, EchoAction, FailAction, SleepAction, StopTimerAction,
    TraceVariablesAction,
};
pub use invoke::InvokeAction;

/// A named unit of work executed against a [`TestContext`].
#[async_trait]
pub trait TestAction: Send + Sync {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Optional human readable description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Runs the action.
    ///
    /// # Errors
    ///
    /// Returns the action's own failure, or the failure of a child for
    /// containers.
    async fn execute(&self, context: &TestContext) -> ActionResult<()>;
}

/// Shared reference to an action.
pub type ActionRef = Arc<dyn TestAction>;
