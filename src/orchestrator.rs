//! Test case model and run orchestration.
//!
//! # Architecture
//!
//! ```text
//!   Plan (TOML)                Orchestrator                 Reporter
//!       │                           │                           │
//!       │ build(&Registry)          │                           │
//!       ▼                           │                           │
//!  Vec<TestCase> ──────────────────►│ on_plan_loaded() ────────►│
//!                                   │                           │
//!                      for each test│                           │
//!                                   │ ContextFactory::create()  │
//!                                   ▼                           │
//!                              TestRunner ── on_test_start() ──►│
//!                                   │                           │
//!                                   │ run(&TestCase)            │
//!                                   ▼                           │
//!                              TestResult ─ on_test_complete() ►│
//!                                   │                           │
//!                                   ▼                           │
//!                              RunResult ── on_run_complete() ─►│
//! ```
//!
//! Tests run one after another, each against a fresh [`TestContext`]
//! created by the shared [`ContextFactory`]. Concurrency lives inside a
//! test (Parallel, Async, Timer) and is carried by the shared scheduler,
//! which [`Orchestrator::shutdown`] drains at the end of the run.
//!
//! [`TestContext`]: crate::context::TestContext

pub mod runner;

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::action::ActionRef;
use crate::config::EngineConfig;
use crate::context::ContextFactory;
use crate::error::ActionError;
use crate::report::Reporter;

pub use runner::TestRunner;

/// A named test: initial variables, top-level actions and `finally`
/// actions.
pub struct TestCase {
    name: String,
    variables: IndexMap<String, String>,
    actions: Vec<ActionRef>,
    finally: Vec<ActionRef>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            name: name.into(),
            variables: IndexMap::new(),
            actions,
            finally: Vec::new(),
        }
    }

    /// Variables set before the first action, in order. Values may
    /// reference variables declared before them.
    pub fn with_variables(mut self, variables: IndexMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Actions run after the body whatever its outcome.
    pub fn with_finally(mut self, actions: Vec<ActionRef>) -> Self {
        self.finally = actions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn actions(&self) -> &[ActionRef] {
        &self.actions
    }

    pub fn finally_actions(&self) -> &[ActionRef] {
        &self.finally
    }
}

/// Outcome of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
}

/// Result of running one [`TestCase`].
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub duration: Duration,

    /// Kind of the deepest error, if the test failed.
    pub error_kind: Option<String>,

    /// Message of the deepest error, if the test failed.
    pub error_message: Option<String>,

    /// Messages from the outermost error down to the deepest one.
    pub cause_chain: Vec<String>,
}

impl TestResult {
    pub fn passed(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: TestOutcome::Passed,
            duration,
            error_kind: None,
            error_message: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn failed(name: impl Into<String>, duration: Duration, error: &ActionError) -> Self {
        let root = error.root_cause();
        Self {
            name: name.into(),
            outcome: TestOutcome::Failed,
            duration,
            error_kind: Some(root.kind().to_string()),
            error_message: Some(root.to_string()),
            cause_chain: error.cause_chain(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }
}

/// Aggregated results of a run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | All tests passed |
/// | 1 | Some tests failed |
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Number of tests run.
    pub total_tests: usize,

    pub passed: usize,

    pub failed: usize,

    /// Wall-clock duration of the entire run.
    pub duration: Duration,

    /// Individual results in execution order.
    pub results: Vec<TestResult>,
}

impl RunResult {
    /// Summarises individual results.
    pub fn from_results(results: Vec<TestResult>, duration: Duration) -> Self {
        let passed = results.iter().filter(|r| r.is_success()).count();
        Self {
            total_tests: results.len(),
            passed,
            failed: results.len() - passed,
            duration,
            results,
        }
    }

    /// Returns `true` if no test failed.
    ///
    /// # Example
    ///
    /// ```
    /// use cadence::orchestrator::RunResult;
    /// use std::time::Duration;
    ///
    /// let result = RunResult::from_results(vec![], Duration::ZERO);
    /// assert!(result.success());
    /// assert_eq!(result.exit_code(), 0);
    /// ```
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Returns an appropriate process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Runs test cases one after another and feeds a reporter.
///
/// # Example
///
/// ```no_run
/// use cadence::config::Config;
/// use cadence::context::ContextFactory;
/// use cadence::orchestrator::Orchestrator;
/// use cadence::plan::load_plan;
/// use cadence::registry::Registry;
/// use cadence::report::ConsoleReporter;
/// use cadence::scheduler::Scheduler;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::default();
///     let registry = Registry::with_builtins(&config.engine)?;
///     let tests = load_plan(std::path::Path::new("plan.toml"))?.build(&registry)?;
///
///     let factory = ContextFactory::new(Scheduler::current());
///     let orchestrator = Orchestrator::new(config.engine, factory, ConsoleReporter::new(false));
///     let result = orchestrator.run(&tests).await;
///     orchestrator.shutdown().await;
///
///     std::process::exit(result.exit_code());
/// }
/// ```
pub struct Orchestrator<R> {
    config: EngineConfig,
    factory: ContextFactory,
    reporter: R,
}

impl<R: Reporter> Orchestrator<R> {
    pub fn new(config: EngineConfig, factory: ContextFactory, reporter: R) -> Self {
        Self {
            config,
            factory,
            reporter,
        }
    }

    /// Runs every test and returns the aggregated results.
    pub async fn run(&self, tests: &[TestCase]) -> RunResult {
        let start = Instant::now();
        let async_timeout = Duration::from_millis(self.config.async_timeout_ms);

        if tests.is_empty() {
            warn!("No tests to run");
        }
        self.reporter.on_plan_loaded(tests).await;

        let mut results = Vec::with_capacity(tests.len());
        for test in tests {
            self.reporter.on_test_start(test).await;
            let runner = TestRunner::new(self.factory.create(), async_timeout);
            let result = runner.run(test).await;
            self.reporter.on_test_complete(&result).await;
            results.push(result);
        }

        let run_result = RunResult::from_results(results, start.elapsed());
        info!(
            "Run finished: {} passed, {} failed",
            run_result.passed, run_result.failed
        );
        self.reporter.on_run_complete(&run_result).await;
        run_result
    }

    /// Drains the scheduler, aborting work still running after the drain
    /// timeout. Returns `true` if everything finished in time.
    pub async fn shutdown(&self) -> bool {
        let drain_timeout = Duration::from_millis(self.config.drain_timeout_ms);
        self.factory.scheduler().shutdown(drain_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::container::testing::{Journal, Recorder};
    use crate::container::Parallel;
    use crate::report::NullReporter;
    use crate::scheduler::Scheduler;

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl Reporter for Arc<EventLog> {
        async fn on_plan_loaded(&self, tests: &[TestCase]) {
            self.push(format!("plan:{}", tests.len()));
        }

        async fn on_test_start(&self, test: &TestCase) {
            self.push(format!("start:{}", test.name()));
        }

        async fn on_test_complete(&self, result: &TestResult) {
            self.push(format!("done:{}:{:?}", result.name, result.outcome));
        }

        async fn on_run_complete(&self, result: &RunResult) {
            self.push(format!("run:{}/{}", result.passed, result.total_tests));
        }
    }

    fn orchestrator<R: Reporter>(reporter: R) -> Orchestrator<R> {
        Orchestrator::new(
            EngineConfig::default(),
            ContextFactory::new(Scheduler::current()),
            reporter,
        )
    }

    #[tokio::test]
    async fn test_run_reports_every_test_in_order() {
        let journal = Journal::default();
        let tests = vec![
            TestCase::new("first", vec![Recorder::ok("a", &journal)]),
            TestCase::new("second", vec![Recorder::failing("b", "IoError", &journal)]),
        ];
        let log = Arc::new(EventLog::default());

        let result = orchestrator(log.clone()).run(&tests).await;
        assert_eq!(result.total_tests, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.success());
        assert_eq!(result.exit_code(), 1);

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "plan:2",
                "start:first",
                "done:first:Passed",
                "start:second",
                "done:second:Failed",
                "run:1/2",
            ]
        );
    }

    #[tokio::test]
    async fn test_tests_get_fresh_contexts() {
        let journal = Journal::default();
        let tests = vec![
            TestCase::new("setter", vec![]).with_variables(
                [("shared".to_string(), "1".to_string())]
                    .into_iter()
                    .collect(),
            ),
            TestCase::new(
                "reader",
                vec![Arc::new(crate::action::EchoAction::new("${shared}"))],
            ),
            TestCase::new("ok", vec![Recorder::ok("a", &journal)]),
        ];

        let result = orchestrator(NullReporter).run(&tests).await;
        assert!(result.results[0].is_success());
        assert_eq!(
            result.results[1].error_kind.as_deref(),
            Some("UnknownVariableError")
        );
        assert!(result.results[2].is_success());
    }

    #[tokio::test]
    async fn test_failure_keeps_root_cause_and_chain() {
        let journal = Journal::default();
        let tests = vec![TestCase::new(
            "parallel",
            vec![Arc::new(Parallel::new(vec![
                Recorder::ok("a", &journal),
                Recorder::failing("b", "IoError", &journal),
            ]))],
        )];

        let result = orchestrator(NullReporter).run(&tests).await;
        let failed = &result.results[0];
        assert_eq!(failed.error_kind.as_deref(), Some("IoError"));
        assert_eq!(failed.error_message.as_deref(), Some("b failed"));
        assert_eq!(failed.cause_chain.len(), 2);
        assert_eq!(failed.cause_chain[1], "b failed");
    }

    #[tokio::test]
    async fn test_shutdown_after_run() {
        let orchestrator = orchestrator(NullReporter);
        let result = orchestrator.run(&[]).await;
        assert!(result.success());
        assert!(orchestrator.shutdown().await);
    }
}
