use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::action::TestAction;
use crate::condition::Condition;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls a condition until it holds or the timeout elapses.
///
/// Each attempt is bounded by the attempt timeout (default: the interval)
/// and by the time left; an attempt that runs out of time counts as not
/// satisfied. Between attempts the caller sleeps for the interval, cut
/// short at the deadline, so a condition that never holds fails after at
/// least `timeout` and before `timeout + interval`.
pub struct Wait {
    condition: Condition,
    timeout: Duration,
    interval: Duration,
    attempt_timeout: Option<Duration>,
}

impl Wait {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            attempt_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    fn timed_out(&self, elapsed: Duration) -> ActionError {
        ActionError::Timeout {
            what: self.condition.description(),
            elapsed,
        }
    }
}

#[async_trait]
impl TestAction for Wait {
    fn name(&self) -> &str {
        "wait"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let attempt_timeout = self.attempt_timeout.unwrap_or(self.interval);
        let start = Instant::now();
        info!(
            "Waiting for {} (timeout {} ms)",
            self.condition.description(),
            self.timeout.as_millis()
        );

        loop {
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(self.timed_out(elapsed));
            }

            let budget = attempt_timeout.min(self.timeout - elapsed);
            match tokio::time::timeout(budget, self.condition.is_satisfied(context)).await {
                Ok(Ok(true)) => {
                    info!("Condition satisfied: {}", self.condition.description());
                    return Ok(());
                }
                Ok(Ok(false)) => debug!("Condition not satisfied yet"),
                Ok(Err(e)) => return Err(e),
                Err(_) => debug!("Condition check timed out after {} ms", budget.as_millis()),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(self.timed_out(elapsed));
            }
            tokio::time::sleep(self.interval.min(self.timeout - elapsed)).await;
        }
    }
}
