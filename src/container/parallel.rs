use async_trait::async_trait;
use tracing::{debug, warn};

use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult, AggregateError, ChildFailure};

/// Runs all children concurrently and joins them.
///
/// Every child runs to completion regardless of its siblings. Failures are
/// reported together as [`ActionError::Aggregate`], ordered by declaration,
/// not by completion.
pub struct Parallel {
    actions: Vec<ActionRef>,
}

impl Parallel {
    pub fn new(actions: Vec<ActionRef>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl TestAction for Parallel {
    fn name(&self) -> &str {
        "parallel"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        debug!("Starting {} parallel action(s)", self.actions.len());

        let scheduler = context.scheduler();
        let handles: Vec<_> = self
            .actions
            .iter()
            .map(|action| {
                let action = action.clone();
                let branch = context.clone();
                scheduler.submit(action.name().to_string(), async move {
                    action.execute(&branch).await
                })
            })
            .collect();

        let mut failures = Vec::new();
        for (index, (action, handle)) in self.actions.iter().zip(handles).enumerate() {
            if let Err(error) = handle.join().await.and_then(|result| result) {
                warn!("Parallel action '{}' failed: {}", action.name(), error);
                failures.push(ChildFailure {
                    index,
                    action: action.name().to_string(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ActionError::Aggregate(AggregateError {
                total: self.actions.len(),
                failures,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::container::testing::{Journal, Recorder};

    struct Panicking;

    #[async_trait]
    impl TestAction for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _context: &TestContext) -> ActionResult<()> {
            panic!("child panicked")
        }
    }

    struct SetVariable(&'static str, &'static str);

    #[async_trait]
    impl TestAction for SetVariable {
        fn name(&self) -> &str {
            "set"
        }

        async fn execute(&self, context: &TestContext) -> ActionResult<()> {
            context.set_variable(self.0, self.1);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_children_run_concurrently() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let delay = Duration::from_millis(100);
        let parallel = Parallel::new(vec![
            Recorder::slow("a", delay, &journal),
            Recorder::slow("b", delay, &journal),
            Recorder::slow("c", delay, &journal),
        ]);

        let start = Instant::now();
        parallel.execute(&context).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(280));
        assert_eq!(journal.entries().len(), 3);
    }

    #[tokio::test]
    async fn test_all_children_run_and_failures_aggregate_in_order() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let children = vec![
            Recorder::slow("slow-failure", Duration::from_millis(40), &journal),
            Recorder::ok("ok", &journal),
            Recorder::failing("fast-failure", "IoError", &journal),
        ];
        let slow_failing = Recorder::failing("late", "Timeout", &journal);
        let parallel = Parallel::new(vec![
            children[1].clone(),
            slow_failing.clone(),
            children[0].clone(),
            children[2].clone(),
        ]);

        let err = parallel.execute(&context).await.unwrap_err();
        let ActionError::Aggregate(aggregate) = &err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert_eq!(aggregate.total, 4);
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate.failures[0].index, 1);
        assert_eq!(aggregate.failures[0].action, "late");
        assert_eq!(aggregate.failures[1].index, 3);
        assert_eq!(aggregate.failures[1].error.kind(), "IoError");

        for child in children.iter().chain(std::iter::once(&slow_failing)) {
            assert_eq!(child.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_panicking_child_is_reported() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let sibling = Recorder::ok("sibling", &journal);
        let parallel = Parallel::new(vec![Arc::new(Panicking), sibling.clone()]);

        let err = parallel.execute(&context).await.unwrap_err();
        assert_eq!(err.root_cause().kind(), "Panic");
        assert_eq!(sibling.calls(), 1);
    }

    #[tokio::test]
    async fn test_branch_writes_visible_after_join() {
        let context = TestContext::standalone();
        let parallel = Parallel::new(vec![
            Arc::new(SetVariable("left", "L")),
            Arc::new(SetVariable("right", "R")),
        ]);

        parallel.execute(&context).await.unwrap();
        assert_eq!(context.get_variable("left").unwrap(), "L");
        assert_eq!(context.get_variable("right").unwrap(), "R");
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_variable_last_writer_wins() {
        let context = TestContext::standalone();
        let parallel = Parallel::new(vec![
            Arc::new(SetVariable("shared", "first")),
            Arc::new(SetVariable("shared", "second")),
        ]);

        parallel.execute(&context).await.unwrap();
        let value = context.get_variable("shared").unwrap();
        assert!(value == "first" || value == "second");
    }
}
