use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};
use crate::scheduler::{timer_task, TimerSchedule};

/// Default interval between firings.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Runs children repeatedly on the scheduler.
///
/// Each firing stores its 1-based number in `${<timer id>-index}`. A timer
/// fires at most `repeat_count` times (`0` means until stopped). In-line
/// timers block until they end; forked timers return immediately and can
/// be stopped later by id. The timer id must be unique among the running
/// timers of a test.
///
/// A failing firing ends the timer. In-line timers raise the failure;
/// forked timers record it in the context so that the test fails.
pub struct Timer {
    id: String,
    actions: Arc<Vec<ActionRef>>,
    delay: Duration,
    interval: Duration,
    repeat_count: usize,
    fork: bool,
}

impl Timer {
    pub fn new(id: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            id: id.into(),
            actions: Arc::new(actions),
            delay: Duration::ZERO,
            interval: DEFAULT_INTERVAL,
            repeat_count: 0,
            fork: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_repeat_count(mut self, repeat_count: usize) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    pub fn forked(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl TestAction for Timer {
    fn name(&self) -> &str {
        "timer"
    }

    fn description(&self) -> Option<&str> {
        Some(&self.id)
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        if context.has_running_timer(&self.id) {
            return Err(ActionError::config(format!(
                "Timer already registered with this id: {}",
                self.id
            )));
        }

        let schedule = TimerSchedule {
            delay: self.delay,
            interval: self.interval,
            repeat_count: self.repeat_count,
        };
        let branch = context.clone();
        let actions = self.actions.clone();
        let id = self.id.clone();
        let fork = self.fork;

        let task = timer_task(move |index| {
            let context = branch.clone();
            let actions = actions.clone();
            let id = id.clone();
            async move {
                context.set_variable(format!("{}-index", id), index.to_string());
                match run_sequence(&actions, &context).await {
                    Ok(()) => Ok(()),
                    Err(e) if fork => {
                        warn!("Timer '{}' failed: {}", id, e);
                        context.add_exception(e);
                        Err(ActionError::failed_with_kind(
                            "TimerError",
                            format!("Timer '{}' stopped after a failed firing", id),
                        ))
                    }
                    Err(e) => Err(e),
                }
            }
        });

        let handle = context.scheduler().schedule(self.id.as_str(), schedule, task);
        if let Err(e) = context.register_timer(&self.id, handle.clone()) {
            handle.stop();
            return Err(e);
        }

        if self.fork {
            debug!("Timer '{}' forked", self.id);
            return Ok(());
        }

        let result = handle.wait().await;
        context.unregister_timer(&self.id);
        let fired = result?;
        info!("Timer '{}' finished after {} firing(s)", self.id, fired);
        Ok(())
    }
}
