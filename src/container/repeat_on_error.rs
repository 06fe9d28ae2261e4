use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{run_sequence, DEFAULT_INDEX_NAME};
use crate::action::{ActionRef, TestAction};
use crate::condition::IndexCondition;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};

/// Default upper bound of attempts.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Default pause after a failed attempt.
pub const DEFAULT_AUTO_SLEEP: Duration = Duration::from_millis(1000);

/// Retries children until one pass succeeds.
///
/// Before each attempt the `until` condition is checked with the current
/// index; once it holds no further attempt is made. Failures are swallowed
/// between attempts. When attempts stop without a successful pass, the
/// last failure is raised wrapped in [`ActionError::RetryExhausted`].
pub struct RepeatOnErrorUntilTrue {
    actions: Vec<ActionRef>,
    until: IndexCondition,
    start: i64,
    auto_sleep: Duration,
    max_attempts: usize,
}

impl RepeatOnErrorUntilTrue {
    pub fn new(until: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            actions,
            until: IndexCondition::new(until, DEFAULT_INDEX_NAME),
            start: 1,
            auto_sleep: DEFAULT_AUTO_SLEEP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.until = self.until.with_index_name(name);
        self
    }

    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    pub fn with_auto_sleep(mut self, auto_sleep: Duration) -> Self {
        self.auto_sleep = auto_sleep;
        self
    }

    /// Upper bound of attempts; must be at least 1.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[async_trait]
impl TestAction for RepeatOnErrorUntilTrue {
    fn name(&self) -> &str {
        "repeat-on-error"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let mut index = self.start;
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_attempts && !self.until.evaluate(index, context)? {
            context.set_variable(self.until.index_name(), index.to_string());
            attempts += 1;

            match run_sequence(&self.actions, context).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    info!(
                        "Caught exception of type {} '{}' - performing retry #{}",
                        e.kind(),
                        e,
                        index
                    );
                    last_error = Some(e);
                }
            }

            index += 1;
            if attempts < self.max_attempts && !self.auto_sleep.is_zero() {
                tokio::time::sleep(self.auto_sleep).await;
            }
        }

        match last_error {
            Some(last) => {
                info!("All retries failed after {} attempt(s)", attempts);
                Err(ActionError::RetryExhausted {
                    attempts,
                    last: Box::new(last),
                })
            }
            None => Ok(()),
        }
    }
}
