use async_trait::async_trait;

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::ActionResult;

/// Runs children in order; the first failure aborts the rest.
pub struct Sequence {
    actions: Vec<ActionRef>,
}

impl Sequence {
    pub fn new(actions: Vec<ActionRef>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl TestAction for Sequence {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        run_sequence(&self.actions, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::{Journal, Recorder};

    #[tokio::test]
    async fn test_children_run_in_order() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let sequence = Sequence::new(vec![
            Recorder::ok("one", &journal),
            Recorder::ok("two", &journal),
            Recorder::ok("three", &journal),
        ]);

        sequence.execute(&context).await.unwrap();
        assert_eq!(journal.entries(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_children() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let skipped = Recorder::ok("skipped", &journal);
        let sequence = Sequence::new(vec![
            Recorder::ok("first", &journal),
            Recorder::failing("second", "IllegalStateException", &journal),
            skipped.clone(),
        ]);

        let err = sequence.execute(&context).await.unwrap_err();
        assert_eq!(err.kind(), "IllegalStateException");
        assert_eq!(skipped.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_sequence_succeeds() {
        let context = TestContext::standalone();
        assert!(Sequence::new(Vec::new()).execute(&context).await.is_ok());
    }
}
