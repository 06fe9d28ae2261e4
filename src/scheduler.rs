//! Execution scheduler backing Parallel, Async and Timer.
//!
//! The scheduler spawns work onto a tokio runtime and keeps track of every
//! task it started so that shutdown can join them with a bounded wait. The
//! worker pool itself is the runtime: the CLI builds a multi-thread runtime
//! with `engine.max_workers` worker threads and hands its [`Handle`] to the
//! scheduler.
//!
//! # Submission contract
//!
//! - [`Scheduler::submit`] runs a future once and returns a [`TaskHandle`].
//! - [`Scheduler::schedule`] runs a task repeatedly according to a
//!   [`TimerSchedule`] and returns a cancellable [`TimerHandle`].
//!
//! Cancellation is cooperative: a stopped timer never starts another
//! firing, but a firing that already started runs to completion.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cadence::scheduler::Scheduler;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scheduler = Scheduler::current();
//! let task = scheduler.submit("answer", async { 42 });
//! assert_eq!(task.join().await.unwrap(), 42);
//! assert!(scheduler.shutdown(Duration::from_secs(1)).await);
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{ActionError, ActionResult};

/// Shortest period a timer fires at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A repeating task. Receives the 1-based firing index.
pub type TimerTask = Arc<dyn Fn(usize) -> BoxFuture<'static, ActionResult<()>> + Send + Sync>;

/// Wraps an async closure as a [`TimerTask`].
pub fn timer_task<F, Fut>(f: F) -> TimerTask
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult<()>> + Send + 'static,
{
    Arc::new(move |index: usize| -> BoxFuture<'static, ActionResult<()>> { Box::pin(f(index)) })
}

/// Timing of a repeating task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSchedule {
    /// Wait before the first firing.
    pub delay: Duration,
    /// Period between the starts of consecutive firings. A firing that
    /// overruns the period delays the next one instead of causing a burst.
    pub interval: Duration,
    /// Maximum number of firings; `0` means unbounded until stopped.
    pub repeat_count: usize,
}

/// Spawns and tracks concurrent work.
///
/// Cloning is cheap; all clones share the same task tracking.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    handle: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    abort_handles: Mutex<Vec<AbortHandle>>,
}

impl Scheduler {
    /// Creates a scheduler spawning onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                handle,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                abort_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a scheduler on the runtime of the caller.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Runs `task` on the pool and returns a handle to its result.
    pub fn submit<F, T>(&self, name: impl Into<String>, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        debug!("Submitting task '{}'", name);
        let join = self.inner.tracker.spawn_on(task, &self.inner.handle);
        self.track(join.abort_handle());
        TaskHandle { name, join }
    }

    /// Starts a repeating task.
    ///
    /// The returned handle stops the timer; stopping also happens when the
    /// scheduler shuts down. A firing that fails ends the timer with that
    /// error.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        schedule: TimerSchedule,
        task: TimerTask,
    ) -> TimerHandle {
        let name = name.into();
        let shared = Arc::new(TimerShared {
            stopped: Mutex::new(false),
            token: self.inner.shutdown.child_token(),
            fired: AtomicUsize::new(0),
        });

        let timer = shared.clone();
        let timer_name = name.clone();
        let join = self.inner.tracker.spawn_on(
            async move {
                if !schedule.delay.is_zero() {
                    select! {
                        _ = timer.token.cancelled() => {
                            timer.mark_stopped();
                            return Ok(0);
                        }
                        _ = tokio::time::sleep(schedule.delay) => {}
                    }
                }

                let mut ticks = tokio::time::interval(schedule.interval.max(MIN_INTERVAL));
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    select! {
                        _ = timer.token.cancelled() => break,
                        _ = ticks.tick() => {}
                    }
                    let Some(index) = timer.begin_firing() else {
                        break;
                    };
                    debug!("Timer '{}' firing #{}", timer_name, index);

                    if let Err(e) = task(index).await {
                        warn!("Timer '{}' failed on firing #{}: {}", timer_name, index, e);
                        timer.mark_stopped();
                        return Err(e);
                    }

                    if schedule.repeat_count > 0 && index >= schedule.repeat_count {
                        break;
                    }
                }

                timer.mark_stopped();
                Ok(timer.fired.load(Ordering::SeqCst))
            },
            &self.inner.handle,
        );
        self.track(join.abort_handle());

        TimerHandle {
            name,
            shared,
            join: Arc::new(tokio::sync::Mutex::new(Some(join))),
        }
    }

    /// Number of tasks and timers that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Stops all timers and waits for outstanding tasks.
    ///
    /// Tasks still running after `drain_timeout` are aborted. Returns `true`
    /// when every task finished on its own.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        let pending = self.inner.tracker.len();
        if pending > 0 {
            info!("Draining {} outstanding task(s)", pending);
        }

        if tokio::time::timeout(drain_timeout, self.inner.tracker.wait())
            .await
            .is_ok()
        {
            return true;
        }

        let handles = std::mem::take(
            &mut *self
                .inner
                .abort_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut aborted = 0;
        for handle in handles.iter().filter(|h| !h.is_finished()) {
            handle.abort();
            aborted += 1;
        }
        warn!(
            "Scheduler drain timed out after {:?}; aborted {} task(s)",
            drain_timeout, aborted
        );
        false
    }

    fn track(&self, handle: AbortHandle) {
        let mut handles = self
            .inner
            .abort_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    name: String,
    join: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task to finish.
    ///
    /// A panicking or aborted task is reported as a failure.
    pub async fn join(self) -> ActionResult<T> {
        self.join.await.map_err(|e| join_error(&self.name, e))
    }
}

fn join_error(name: &str, error: JoinError) -> ActionError {
    if error.is_cancelled() {
        ActionError::failed_with_kind("Cancelled", format!("Task '{}' was cancelled", name))
    } else {
        ActionError::failed_with_kind("Panic", format!("Task '{}' panicked", name))
    }
}

struct TimerShared {
    stopped: Mutex<bool>,
    token: CancellationToken,
    fired: AtomicUsize,
}

impl TimerShared {
    /// Claims the next firing index unless the timer was stopped.
    fn begin_firing(&self) -> Option<usize> {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        if *stopped || self.token.is_cancelled() {
            return None;
        }
        Some(self.fired.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn mark_stopped(&self) -> bool {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let was_running = !*stopped;
        *stopped = true;
        self.token.cancel();
        was_running
    }
}

/// Cancellable handle to a repeating task.
///
/// Clones refer to the same timer.
#[derive(Clone)]
pub struct TimerHandle {
    name: String,
    shared: Arc<TimerShared>,
    join: Arc<tokio::sync::Mutex<Option<JoinHandle<ActionResult<usize>>>>>,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer.
    ///
    /// Once this returns no new firing starts. Returns `false` if the timer
    /// was already stopped.
    pub fn stop(&self) -> bool {
        let was_running = self.shared.mark_stopped();
        if was_running {
            debug!("Timer '{}' stopped", self.name);
        }
        was_running
    }

    pub fn is_stopped(&self) -> bool {
        *self
            .shared
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of firings started so far.
    pub fn fired(&self) -> usize {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Waits for the timer to end and returns the number of firings.
    ///
    /// Only the first caller observes the outcome; later callers get `Ok`
    /// with the current firing count.
    pub async fn wait(&self) -> ActionResult<usize> {
        let join = self.join.lock().await.take();
        match join {
            Some(join) => join.await.map_err(|e| join_error(&self.name, e))?,
            None => Ok(self.fired()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn counting_task(counter: Arc<AtomicUsize>) -> TimerTask {
        timer_task(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let scheduler = Scheduler::current();
        let handle = scheduler.submit("double", async { 21 * 2 });
        assert_eq!(handle.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_panicking_task_reports_failure() {
        let scheduler = Scheduler::current();
        let handle = scheduler.submit("boom", async {
            if true {
                panic!("boom");
            }
        });
        let err = handle.join().await.unwrap_err();
        assert_eq!(err.kind(), "Panic");
    }

    #[tokio::test]
    async fn test_timer_respects_repeat_count() {
        let scheduler = Scheduler::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(
            "three",
            TimerSchedule {
                delay: Duration::ZERO,
                interval: Duration::from_millis(5),
                repeat_count: 3,
            },
            counting_task(counter.clone()),
        );

        assert_eq!(timer.wait().await.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_runs_from_firing_start_to_firing_start() {
        let scheduler = Scheduler::current();
        let origin = tokio::time::Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = starts.clone();
        let timer = scheduler.schedule(
            "rate",
            TimerSchedule {
                delay: Duration::ZERO,
                interval: Duration::from_millis(50),
                repeat_count: 3,
            },
            timer_task(move |_| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(origin.elapsed());
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(())
                }
            }),
        );

        assert_eq!(timer.wait().await.unwrap(), 3);
        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            let period = pair[1] - pair[0];
            assert!(period >= Duration::from_millis(50), "{period:?}");
            assert!(period < Duration::from_millis(80), "{period:?}");
        }
    }

    #[tokio::test]
    async fn test_stopped_timer_never_fires_again() {
        let scheduler = Scheduler::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(
            "unbounded",
            TimerSchedule {
                delay: Duration::ZERO,
                interval: Duration::from_millis(10),
                repeat_count: 0,
            },
            counting_task(counter.clone()),
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(timer.stop());
        let at_stop = timer.fired();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(timer.fired(), at_stop);
        assert_eq!(timer.wait().await.unwrap(), at_stop);
        assert!(!timer.stop());
    }

    #[tokio::test]
    async fn test_stop_during_delay_prevents_first_firing() {
        let scheduler = Scheduler::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(
            "delayed",
            TimerSchedule {
                delay: Duration::from_millis(200),
                interval: Duration::from_millis(10),
                repeat_count: 0,
            },
            counting_task(counter.clone()),
        );

        timer.stop();
        assert_eq!(timer.wait().await.unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_firing_ends_timer() {
        let scheduler = Scheduler::current();
        let task = timer_task(|index| async move {
            if index == 2 {
                Err(ActionError::failed("second firing failed"))
            } else {
                Ok(())
            }
        });
        let timer = scheduler.schedule(
            "failing",
            TimerSchedule {
                delay: Duration::ZERO,
                interval: Duration::from_millis(1),
                repeat_count: 5,
            },
            task,
        );

        let err = timer.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "second firing failed");
        assert_eq!(timer.fired(), 2);
        assert!(timer.is_stopped());
    }

    #[tokio::test]
    async fn test_shutdown_stops_timers_and_drains() {
        let scheduler = Scheduler::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(
            "background",
            TimerSchedule {
                delay: Duration::ZERO,
                interval: Duration::from_millis(5),
                repeat_count: 0,
            },
            counting_task(counter),
        );
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let _task = scheduler.submit("short", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(scheduler.shutdown(Duration::from_secs(2)).await);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(scheduler.active_tasks(), 0);
        assert!(timer.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_drain_timeout() {
        let scheduler = Scheduler::current();
        let handle = scheduler.submit("stuck", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let start = Instant::now();
        assert!(!scheduler.shutdown(Duration::from_millis(50)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.join().await.unwrap_err().kind(), "Cancelled");
    }
}
