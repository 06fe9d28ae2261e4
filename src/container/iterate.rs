use async_trait::async_trait;
use tracing::debug;

use super::{run_sequence, DEFAULT_INDEX_NAME};
use crate::action::{ActionRef, TestAction};
use crate::condition::IndexCondition;
use crate::context::TestContext;
use crate::error::ActionResult;

/// Runs children while an index condition holds.
///
/// The condition is checked before each pass. The index starts at `start`
/// (default 1) and grows by `step` (default 1) after each pass; it is
/// stored in the index variable when a pass begins. Conditions refer to
/// the index by its bare name (`i lt 5`) or use a matcher expression.
///
/// There is no built-in timeout: an always-true condition loops forever.
pub struct Iterate {
    actions: Vec<ActionRef>,
    condition: IndexCondition,
    start: i64,
    step: i64,
}

impl Iterate {
    pub fn new(condition: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            actions,
            condition: IndexCondition::new(condition, DEFAULT_INDEX_NAME),
            start: 1,
            step: 1,
        }
    }

    pub fn with_index_name(mut self, name: impl Into<String>) -> Self {
        self.condition = self.condition.with_index_name(name);
        self
    }

    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }
}

#[async_trait]
impl TestAction for Iterate {
    fn name(&self) -> &str {
        "iterate"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let mut index = self.start;
        let index_name = self.condition.index_name();
        while self.condition.evaluate(index, context)? {
            debug!("Iteration {} = {}", index_name, index);
            context.set_variable(index_name, index.to_string());
            run_sequence(&self.actions, context).await?;
            index += self.step;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{Journal, Recorder};

    #[tokio::test]
    async fn test_runs_while_condition_holds() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let child = Recorder::ok("child", &journal);
        let iterate = Iterate::new("i lt= 3", vec![child.clone()]);

        iterate.execute(&context).await.unwrap();
        assert_eq!(child.calls(), 3);
        assert_eq!(context.get_variable("i").unwrap(), "3");
    }

    #[tokio::test]
    async fn test_false_condition_runs_nothing() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let child = Recorder::ok("child", &journal);
        let iterate = Iterate::new("i gt 10", vec![child.clone()]);

        iterate.execute(&context).await.unwrap();
        assert_eq!(child.calls(), 0);
        assert!(!context.has_variable("i"));
    }

    #[tokio::test]
    async fn test_custom_index_start_and_step() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let child = Recorder::ok("child", &journal);
        let iterate = Iterate::new("count lt 10", vec![child.clone()])
            .with_index_name("count")
            .with_start(0)
            .with_step(4);

        iterate.execute(&context).await.unwrap();
        assert_eq!(child.calls(), 3);
        assert_eq!(context.get_variable("count").unwrap(), "8");
    }

    #[tokio::test]
    async fn test_matcher_condition() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let child = Recorder::ok("child", &journal);
        let iterate = Iterate::new("@lowerThan(4)@", vec![child.clone()]);

        iterate.execute(&context).await.unwrap();
        assert_eq!(child.calls(), 3);
    }

    #[tokio::test]
    async fn test_child_failure_stops_iteration() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let after = Recorder::ok("after", &journal);
        let iterate = Iterate::new(
            "i lt 5",
            vec![Recorder::failing("broken", "IoError", &journal), after.clone()],
        );

        let err = iterate.execute(&context).await.unwrap_err();
        assert_eq!(err.kind(), "IoError");
        assert_eq!(after.calls(), 0);
        assert_eq!(journal.entries(), vec!["broken"]);
    }

    #[tokio::test]
    async fn test_invalid_condition_fails() {
        let context = TestContext::standalone();
        let iterate = Iterate::new("i lt", Vec::new());
        let err = iterate.execute(&context).await.unwrap_err();
        assert_eq!(err.kind(), "EvaluationError");
    }
}
