//! Leaf actions that only touch the test context.

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::info;

use super::TestAction;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult, DEFAULT_FAILURE_KIND};

/// Logs a message after resolving variables and functions in it.
pub struct EchoAction {
    message: String,
}

impl EchoAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TestAction for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let message = context.resolve(&self.message)?;
        info!("{}", message);
        Ok(())
    }
}

/// Suspends the current branch for a fixed time.
pub struct SleepAction {
    duration: Duration,
}

impl SleepAction {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TestAction for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, _context: &TestContext) -> ActionResult<()> {
        info!("Sleeping {} ms", self.duration.as_millis());
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Sets variables; values are resolved before they are stored.
pub struct CreateVariablesAction {
    variables: IndexMap<String, String>,
}

impl CreateVariablesAction {
    pub fn new(variables: IndexMap<String, String>) -> Self {
        Self { variables }
    }
}

#[async_trait]
impl TestAction for CreateVariablesAction {
    fn name(&self) -> &str {
        "create-variables"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        for (name, value) in &self.variables {
            let value = context.resolve(value)?;
            context.set_variable(name.as_str(), value);
        }
        Ok(())
    }
}

/// Always fails with the configured kind and message.
pub struct FailAction {
    kind: String,
    message: String,
}

impl FailAction {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: DEFAULT_FAILURE_KIND.to_string(),
            message: message.into(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

#[async_trait]
impl TestAction for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let message = context.resolve(&self.message)?;
        Err(ActionError::failed_with_kind(self.kind.clone(), message))
    }
}

/// Logs variables; all of them when no names are given.
pub struct TraceVariablesAction {
    names: Vec<String>,
}

impl TraceVariablesAction {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

#[async_trait]
impl TestAction for TraceVariablesAction {
    fn name(&self) -> &str {
        "trace-variables"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        if self.names.is_empty() {
            for (name, value) in context.variables() {
                info!("Variable {} = '{}'", name, value);
            }
            return Ok(());
        }

        for name in &self.names {
            info!("Variable {} = '{}'", name, context.get_variable(name)?);
        }
        Ok(())
    }
}

/// Stops one timer by id, or every timer of the test when no id is set.
pub struct StopTimerAction {
    timer_id: Option<String>,
}

impl StopTimerAction {
    pub fn new(timer_id: impl Into<String>) -> Self {
        Self {
            timer_id: Some(timer_id.into()),
        }
    }

    pub fn all() -> Self {
        Self { timer_id: None }
    }
}

#[async_trait]
impl TestAction for StopTimerAction {
    fn name(&self) -> &str {
        "stop-timer"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        match &self.timer_id {
            Some(id) => {
                let id = context.resolve(id)?;
                if context.stop_timer(&id) {
                    info!("Stopped timer '{}'", id);
                }
            }
            None => {
                let stopped = context.stop_timers();
                info!("Stopped {} timer(s)", stopped);
            }
        }
        Ok(())
    }
}
