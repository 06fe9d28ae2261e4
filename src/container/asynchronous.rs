use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::ActionResult;

/// Runs children in the background and returns immediately.
///
/// When the branch finishes, the success actions run if it succeeded and
/// the error actions run if it failed, both on the background task. A
/// failure is recorded in the context so the test fails once its async
/// branches are joined; failures of the continuations are recorded too.
pub struct AsyncContainer {
    actions: Arc<Vec<ActionRef>>,
    success_actions: Arc<Vec<ActionRef>>,
    error_actions: Arc<Vec<ActionRef>>,
}

impl AsyncContainer {
    pub fn new(actions: Vec<ActionRef>) -> Self {
        Self {
            actions: Arc::new(actions),
            success_actions: Arc::new(Vec::new()),
            error_actions: Arc::new(Vec::new()),
        }
    }

    pub fn with_success_actions(mut self, actions: Vec<ActionRef>) -> Self {
        self.success_actions = Arc::new(actions);
        self
    }

    pub fn with_error_actions(mut self, actions: Vec<ActionRef>) -> Self {
        self.error_actions = Arc::new(actions);
        self
    }
}

#[async_trait]
impl TestAction for AsyncContainer {
    fn name(&self) -> &str {
        "async"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let actions = self.actions.clone();
        let on_success = self.success_actions.clone();
        let on_error = self.error_actions.clone();
        let branch = context.clone();

        let handle = context.scheduler().submit("async", async move {
            match run_sequence(&actions, &branch).await {
                Ok(()) => {
                    debug!("Async actions finished; running success actions");
                    if let Err(e) = run_sequence(&on_success, &branch).await {
                        warn!("Async success action failed: {}", e);
                        branch.add_exception(e);
                    }
                }
                Err(e) => {
                    error!("Async actions failed: {}", e);
                    if let Err(continuation) = run_sequence(&on_error, &branch).await {
                        warn!("Async error action failed: {}", continuation);
                        branch.add_exception(continuation);
                    }
                    branch.add_exception(e);
                }
            }
        });

        context.track_async(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::container::testing::{Journal, Recorder};

    #[tokio::test]
    async fn test_returns_before_branch_completes() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let container = AsyncContainer::new(vec![Recorder::slow(
            "slow",
            Duration::from_millis(100),
            &journal,
        )]);

        let start = Instant::now();
        container.execute(&context).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(80));
        assert_eq!(context.pending_async(), 1);

        context
            .await_async_completion(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(journal.entries(), vec!["slow"]);
        assert!(!context.has_exceptions());
    }

    #[tokio::test]
    async fn test_success_actions_run_after_branch() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let on_error = Recorder::ok("on-error", &journal);
        let container = AsyncContainer::new(vec![
            Recorder::slow("first", Duration::from_millis(20), &journal),
            Recorder::ok("second", &journal),
        ])
        .with_success_actions(vec![Recorder::ok("on-success", &journal)])
        .with_error_actions(vec![on_error.clone()]);

        container.execute(&context).await.unwrap();
        context
            .await_async_completion(Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["first", "second", "on-success"]);
        assert_eq!(on_error.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_runs_error_actions_and_is_recorded() {
        let context = TestContext::standalone();
        let journal = Journal::default();
        let on_success = Recorder::ok("on-success", &journal);
        let container = AsyncContainer::new(vec![Recorder::failing(
            "broken",
            "IoError",
            &journal,
        )])
        .with_success_actions(vec![on_success.clone()])
        .with_error_actions(vec![Recorder::ok("on-error", &journal)]);

        container.execute(&context).await.unwrap();
        context
            .await_async_completion(Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["broken", "on-error"]);
        assert_eq!(on_success.calls(), 0);
        let recorded = context.take_exceptions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind(), "IoError");
    }
}
