//! Control-flow containers.
//!
//! A container is a [`TestAction`](crate::action::TestAction) owning child
//! actions and a policy for running them.
//!
//! | Container | Runs children | On child failure |
//! |-----------|---------------|------------------|
//! | [`Sequence`] | once, in order, on the caller | stops, propagates |
//! | [`Parallel`] | once, concurrently on the scheduler | waits for all, raises an aggregate |
//! | [`AsyncContainer`] | once, in the background | runs error actions, fails the test at the join barrier |
//! | [`Iterate`] | while the index condition holds | stops, propagates |
//! | [`RepeatUntilTrue`] | until the condition holds after a pass | stops (or ignores, if configured) |
//! | [`RepeatOnErrorUntilTrue`] | until a pass succeeds | retries; raises the last failure when exhausted |
//! | [`Timer`] | every interval, up to a repeat count | ends the timer |
//! | [`Wait`] | polls a condition | times out |
//! | [`Catch`] | once, in order | suppresses matching failures |
//! | [`Assert`] | one action, expecting failure | fails unless a matching failure occurred |
//! | [`Conditional`] | once, if an expression holds | stops, propagates |
//! | [`Template`] | once, in order, after setting its parameters | stops, propagates |
//!
//! Only Parallel, Async and Timer hand work to the scheduler; every other
//! container runs on the calling task.

pub mod assert;
pub mod asynchronous;
pub mod catch;
pub mod conditional;
pub mod iterate;
pub mod parallel;
pub mod repeat;
pub mod repeat_on_error;
pub mod sequence;
pub mod template;
pub mod timer;
pub mod wait;

use tracing::debug;

use crate::action::ActionRef;
use crate::context::TestContext;
use crate::error::ActionResult;

pub use assert::Assert;
pub use asynchronous::AsyncContainer;
pub use catch::{Catch, ErrorFilter};
pub use conditional::Conditional;
pub use iterate::Iterate;
pub use parallel::Parallel;
pub use repeat::RepeatUntilTrue;
pub use repeat_on_error::RepeatOnErrorUntilTrue;
pub use sequence::Sequence;
pub use template::Template;
pub use timer::Timer;
pub use wait::Wait;

/// Default name of the loop index variable.
pub const DEFAULT_INDEX_NAME: &str = "i";

/// Runs `actions` in order, stopping at the first failure.
pub async fn run_sequence(actions: &[ActionRef], context: &TestContext) -> ActionResult<()> {
    for action in actions {
        debug!("Executing action '{}'", action.name());
        action.execute(context).await?;
    }
    Ok(())
}
