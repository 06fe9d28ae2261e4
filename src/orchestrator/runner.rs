//! Runs a single test case against its own context.
//!
//! # Lifecycle
//!
//! 1. Initialise the test variables (values may reference earlier ones)
//! 2. Run the top-level actions fail-fast; a failure recorded by a forked
//!    branch aborts the test before the next top-level action
//! 3. Settle background work: join outstanding Async branches, stop every
//!    timer, wait for in-flight firings, then join the branches those
//!    firings started
//! 4. Collect failures recorded by forked branches
//! 5. Run the `finally` actions and settle the background work they
//!    started; failures of this phase are logged only

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{TestCase, TestResult};
use crate::action::ActionRef;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};

/// Executes one [`TestCase`].
pub struct TestRunner {
    context: TestContext,
    async_timeout: Duration,
}

impl TestRunner {
    /// Creates a runner.
    ///
    /// # Arguments
    ///
    /// * `context` - Fresh context owned by this test
    /// * `async_timeout` - Bound on the end-of-test join of Async branches
    ///   and timers
    pub fn new(context: TestContext, async_timeout: Duration) -> Self {
        Self {
            context,
            async_timeout,
        }
    }

    pub fn context(&self) -> &TestContext {
        &self.context
    }

    /// Runs the test through its whole lifecycle.
    ///
    /// Never fails: every failure ends up in the returned [`TestResult`].
    pub async fn run(&self, test: &TestCase) -> TestResult {
        let start = Instant::now();
        info!("Running test '{}'", test.name());

        let mut failure = match self.initialise(test) {
            Ok(()) => self.run_body(test.actions()).await.err(),
            Err(e) => Some(e),
        };

        for e in self.settle().await {
            record(&mut failure, e);
        }

        for action in test.finally_actions() {
            if let Err(e) = action.execute(&self.context).await {
                warn!("Finally action '{}' failed: {}", action.name(), e);
            }
        }
        for e in self.settle().await {
            warn!("Background work of finally actions failed: {}", e);
        }

        let duration = start.elapsed();
        match failure {
            None => {
                info!("Test '{}' passed in {:?}", test.name(), duration);
                TestResult::passed(test.name(), duration)
            }
            Some(e) => {
                info!("Test '{}' failed in {:?}: {}", test.name(), duration, e);
                TestResult::failed(test.name(), duration, &e)
            }
        }
    }

    fn initialise(&self, test: &TestCase) -> ActionResult<()> {
        for (name, value) in test.variables() {
            let value = self.context.resolve(value)?;
            self.context.set_variable(name.as_str(), value);
        }
        Ok(())
    }

    async fn run_body(&self, actions: &[ActionRef]) -> ActionResult<()> {
        for action in actions {
            if let Some(e) = self.context.take_exception() {
                debug!("Aborting test on failure of a forked branch");
                return Err(e);
            }
            action.execute(&self.context).await?;
        }
        Ok(())
    }

    /// Joins Async branches and stops timers until no background work of
    /// this test is left, then drains the failures it recorded.
    async fn settle(&self) -> Vec<ActionError> {
        let mut errors = Vec::new();
        if let Err(e) = self.context.await_async_completion(self.async_timeout).await {
            errors.push(e);
        }
        self.stop_timers().await;

        // Firings in flight at the stop may have started more branches
        if let Err(e) = self.context.await_async_completion(self.async_timeout).await {
            errors.push(e);
        }
        errors.extend(self.context.take_exceptions());
        errors
    }

    async fn stop_timers(&self) {
        let stopped = self.context.stop_timers();
        if stopped > 0 {
            debug!("Stopped {} running timer(s)", stopped);
        }
        if !self.context.await_timers(self.async_timeout).await {
            warn!(
                "Timers still firing after {} ms",
                self.async_timeout.as_millis()
            );
        }
    }
}

/// Keeps the first failure; later ones are logged.
fn record(failure: &mut Option<ActionError>, error: ActionError) {
    if failure.is_none() {
        *failure = Some(error);
    } else {
        warn!("Additional failure: {}", error);
    }
}
