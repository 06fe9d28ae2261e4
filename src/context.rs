//! Per-test mutable state shared by every action of a test case.
//!
//! A [`TestContext`] is a cheap handle over shared state. All branches of a
//! test (including Parallel children, Async branches and forked Timer
//! firings) see the same context:
//!
//! - variable writes are visible to every other branch immediately;
//! - concurrent writes to the same variable are last-writer-wins, with no
//!   ordering guarantee among concurrent writers.
//!
//! Besides variables the context carries the function and validation-matcher
//! registries, the message listener fan-out, recorded messages, live timers,
//! outstanding Async branches, and failures raised by forked work.

pub mod functions;
pub mod matchers;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{ActionError, ActionResult};
use crate::message::{Message, MessageDirection, MessageListener, MessageListeners, MessageStore};
use crate::scheduler::{Scheduler, TaskHandle, TimerHandle};

pub use functions::FunctionRegistry;
pub use matchers::ValidationMatcherRegistry;

/// Builds fresh contexts that share registries, listeners and the scheduler.
#[derive(Clone)]
pub struct ContextFactory {
    scheduler: Scheduler,
    functions: Arc<FunctionRegistry>,
    matchers: Arc<ValidationMatcherRegistry>,
    listeners: MessageListeners,
}

impl ContextFactory {
    /// Creates a factory with the built-in functions and matchers.
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            functions: Arc::new(FunctionRegistry::with_defaults()),
            matchers: Arc::new(ValidationMatcherRegistry::with_defaults()),
            listeners: MessageListeners::new(),
        }
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn with_matchers(mut self, matchers: ValidationMatcherRegistry) -> Self {
        self.matchers = Arc::new(matchers);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.listeners.add(listener);
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Creates an empty context for one test case.
    pub fn create(&self) -> TestContext {
        TestContext {
            variables: Arc::new(RwLock::new(IndexMap::new())),
            inner: Arc::new(ContextInner {
                functions: self.functions.clone(),
                matchers: self.matchers.clone(),
                listeners: self.listeners.clone(),
                messages: MessageStore::new(),
                timers: Mutex::new(IndexMap::new()),
                async_branches: Mutex::new(Vec::new()),
                exceptions: Mutex::new(Vec::new()),
                scheduler: self.scheduler.clone(),
            }),
        }
    }
}

/// Shared mutable state of a running test case.
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<ContextInner>,
    variables: Arc<RwLock<IndexMap<String, String>>>,
}

struct ContextInner {
    functions: Arc<FunctionRegistry>,
    matchers: Arc<ValidationMatcherRegistry>,
    listeners: MessageListeners,
    messages: MessageStore,
    timers: Mutex<IndexMap<String, TimerHandle>>,
    async_branches: Mutex<Vec<TaskHandle<()>>>,
    exceptions: Mutex<Vec<ActionError>>,
    scheduler: Scheduler,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TestContext {
    /// Creates a context with the built-in registries on `scheduler`.
    pub fn new(scheduler: Scheduler) -> Self {
        ContextFactory::new(scheduler).create()
    }

    /// Creates a context on the runtime of the caller.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn standalone() -> Self {
        Self::new(Scheduler::current())
    }

    // ----- variables -------------------------------------------------------

    /// Returns the value of a variable.
    ///
    /// # Errors
    ///
    /// Fails with [`ActionError::UnknownVariable`] when the variable is not set.
    pub fn get_variable(&self, name: &str) -> ActionResult<String> {
        self.variable(name)
            .ok_or_else(|| ActionError::UnknownVariable(name.to_string()))
    }

    /// Returns the value of a variable, if set.
    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Sets a variable, replacing any previous value.
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        debug!("Setting variable: {} with value: '{}'", name, value);
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn remove_variable(&self, name: &str) -> Option<String> {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
    }

    /// Creates a context with a private copy of the current variables.
    ///
    /// Registries, messages, timers, Async branches and recorded failures
    /// stay shared with `self`, so background work started through the
    /// copy is still joined at the end of the test.
    pub fn isolated(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            variables: Arc::new(RwLock::new(self.variables())),
        }
    }

    /// Snapshot of all variables in insertion order.
    pub fn variables(&self) -> IndexMap<String, String> {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Renders all variables as `name = 'value'` lines for debugging.
    pub fn dump_variables(&self) -> String {
        self.variables()
            .iter()
            .map(|(name, value)| format!("{} = '{}'", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replaces `${name}` references with variable values.
    pub fn replace_variables(&self, input: &str) -> ActionResult<String> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| {
                ActionError::Evaluation(format!("Unterminated variable expression in '{}'", input))
            })?;
            output.push_str(&self.get_variable(after[..end].trim())?);
            rest = &after[end + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }

    /// Resolves variable references and then function calls in `input`.
    pub fn resolve(&self, input: &str) -> ActionResult<String> {
        let replaced = self.replace_variables(input)?;
        self.inner.functions.resolve(&replaced)
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    pub fn matchers(&self) -> &ValidationMatcherRegistry {
        &self.inner.matchers
    }

    // ----- messages --------------------------------------------------------

    pub fn messages(&self) -> &MessageStore {
        &self.inner.messages
    }

    /// Notifies listeners about a message sent by the test.
    pub fn on_outbound(&self, message: &Message) {
        self.inner.listeners.notify(MessageDirection::Outbound, message);
    }

    /// Notifies listeners about a message received by the test.
    pub fn on_inbound(&self, message: &Message) {
        self.inner.listeners.notify(MessageDirection::Inbound, message);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    // ----- timers ----------------------------------------------------------

    /// Registers a live timer under its id.
    ///
    /// A stopped timer with the same id is replaced.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when a running timer already uses `id`.
    pub fn register_timer(&self, id: &str, timer: TimerHandle) -> ActionResult<()> {
        let mut timers = lock(&self.inner.timers);
        if timers.get(id).is_some_and(|existing| !existing.is_stopped()) {
            return Err(ActionError::config(format!(
                "Timer already registered with this id: {}",
                id
            )));
        }
        timers.insert(id.to_string(), timer);
        Ok(())
    }

    /// Removes a timer from the registry without stopping it.
    pub fn unregister_timer(&self, id: &str) -> Option<TimerHandle> {
        lock(&self.inner.timers).shift_remove(id)
    }

    /// Stops the timer registered under `id`.
    ///
    /// Returns `false` when no such timer exists or it was already stopped.
    pub fn stop_timer(&self, id: &str) -> bool {
        let timer = lock(&self.inner.timers).get(id).cloned();
        match timer {
            Some(timer) => timer.stop(),
            None => {
                warn!("No timer registered with id '{}'", id);
                false
            }
        }
    }

    /// Stops every registered timer and returns how many were still running.
    pub fn stop_timers(&self) -> usize {
        let timers: Vec<TimerHandle> = lock(&self.inner.timers).values().cloned().collect();
        timers.iter().filter(|timer| timer.stop()).count()
    }

    /// Returns `true` when a timer with `id` is registered and not stopped.
    pub fn has_running_timer(&self, id: &str) -> bool {
        lock(&self.inner.timers)
            .get(id)
            .is_some_and(|timer| !timer.is_stopped())
    }

    pub fn timer_ids(&self) -> Vec<String> {
        lock(&self.inner.timers).keys().cloned().collect()
    }

    /// Waits until every registered timer has ended, at most `timeout`.
    ///
    /// Returns `false` when some timer was still running at the deadline.
    /// Timer failures are not reported here; forked timers record them in
    /// the context as they happen.
    pub async fn await_timers(&self, timeout: Duration) -> bool {
        let timers: Vec<TimerHandle> = lock(&self.inner.timers).values().cloned().collect();
        let all = futures::future::join_all(timers.iter().map(|timer| timer.wait()));
        tokio::time::timeout(timeout, all).await.is_ok()
    }

    // ----- async branches --------------------------------------------------

    /// Tracks an Async branch for the end-of-test join barrier.
    pub fn track_async(&self, branch: TaskHandle<()>) {
        lock(&self.inner.async_branches).push(branch);
    }

    /// Number of tracked Async branches not joined yet.
    pub fn pending_async(&self) -> usize {
        lock(&self.inner.async_branches).len()
    }

    /// Waits for all tracked Async branches, including branches started
    /// while waiting.
    ///
    /// Branches still running at the deadline are left to finish on their
    /// own; they are never aborted mid-action.
    ///
    /// # Errors
    ///
    /// Fails with [`ActionError::Timeout`] when branches are still running
    /// after `timeout`.
    pub async fn await_async_completion(&self, timeout: Duration) -> ActionResult<()> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let branches = std::mem::take(&mut *lock(&self.inner.async_branches));
            if branches.is_empty() {
                return Ok(());
            }
            info!("Waiting for {} async action(s) to complete", branches.len());

            for branch in branches {
                let name = branch.name().to_string();
                match tokio::time::timeout_at(deadline, branch.join()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Async branch '{}' ended abnormally: {}", name, e);
                        self.add_exception(e);
                    }
                    Err(_) => {
                        return Err(ActionError::Timeout {
                            what: "async actions to complete".to_string(),
                            elapsed: start.elapsed(),
                        });
                    }
                }
            }
        }
    }

    // ----- forked failures -------------------------------------------------

    /// Records a failure raised by forked work owned by this test.
    pub fn add_exception(&self, error: ActionError) {
        debug!("Recording exception from forked action: {}", error);
        lock(&self.inner.exceptions).push(error);
    }

    pub fn has_exceptions(&self) -> bool {
        !lock(&self.inner.exceptions).is_empty()
    }

    /// Removes and returns the earliest recorded failure.
    pub fn take_exception(&self) -> Option<ActionError> {
        let mut exceptions = lock(&self.inner.exceptions);
        if exceptions.is_empty() {
            None
        } else {
            Some(exceptions.remove(0))
        }
    }

    /// Removes and returns all recorded failures in recording order.
    pub fn take_exceptions(&self) -> Vec<ActionError> {
        std::mem::take(&mut *lock(&self.inner.exceptions))
    }
}
