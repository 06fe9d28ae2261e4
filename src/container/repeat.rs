use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{run_sequence, DEFAULT_INDEX_NAME};
use crate::action::{ActionRef, TestAction};
use crate::condition::IndexCondition;
use crate::context::TestContext;
use crate::error::ActionResult;

/// Runs children, then checks the `until` condition; repeats while false.
///
/// Child failures propagate unless `ignore_errors` is set, in which case
/// they are logged and the condition decides as usual.
pub struct RepeatUntilTrue {
    actions: Vec<ActionRef>,
    until: IndexCondition,
    start: i64,
    auto_sleep: Duration,
    ignore_errors: bool,
}

impl RepeatUntilTrue {
    pub fn new(until: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            actions,
            until: IndexCondition::new(until, DEFAULT_INDEX_NAME),
            start: 1,
            auto_sleep: Duration::ZERO,
            ignore_errors: false,
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

    /// Pause between passes.
    pub fn with_auto_sleep(mut self, auto_sleep: Duration) -> Self {
        self.auto_sleep = auto_sleep;
        self
    }

    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }
}

#[async_trait]
impl TestAction for RepeatUntilTrue {
    fn name(&self) -> &str {
        "repeat"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let index_name = self.until.index_name();
        let mut index = self.start;
        loop {
            debug!("Repeat pass {} = {}", index_name, index);
            context.set_variable(index_name, index.to_string());

            match run_sequence(&self.actions, context).await {
                Ok(()) => {}
                Err(e) if self.ignore_errors => {
                    warn!("Ignoring failure in pass {}: {}", index, e);
                }
                Err(e) => return Err(e),
            }

            if self.until.evaluate(index, context)? {
                return Ok(());
            }

            index += 1;
            if !self.auto_sleep.is_zero() {
                tokio::time::sleep(self.auto_sleep).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{Flaky, Journal, Recorder};

    #[tokio::test]
    async fn test_until_index_equals_three() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let noop = Recorder::ok("noop", &journal);
        let repeat = RepeatUntilTrue::new("i == 3", vec![noop.clone()]);

        repeat.execute(&context).await.unwrap();
        assert_eq!(noop.calls(), 3);
        assert_eq!(context.get_variable("i").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_runs_at_least_once() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let child = Recorder::ok("child", &journal);
        let repeat = RepeatUntilTrue::new("true", vec![child.clone()]);

        repeat.execute(&context).await.unwrap();
        assert_eq!(child.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_propagates_by_default() {
        let context = TestContext::standalone();
        let flaky = Flaky::new(2);
        let repeat = RepeatUntilTrue::new("i = 3", vec![flaky.clone()]);

        let err = repeat.execute(&context).await.unwrap_err();
        assert_eq!(err.kind(), "IoError");
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_ignore_errors_keeps_repeating() {
        let context = TestContext::standalone();
        let flaky = Flaky::new(2);
        let repeat = RepeatUntilTrue::new("i = 3", vec![flaky.clone()]).ignore_errors(true);

        repeat.execute(&context).await.unwrap();
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_auto_sleep_between_passes() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let repeat = RepeatUntilTrue::new("i = 3", vec![Recorder::ok("noop", &journal)])
            .with_auto_sleep(Duration::from_millis(20));

        let start = std::time::Instant::now();
        repeat.execute(&context).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
