//! Test reporting and output generation.

pub mod junit;

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::orchestrator::{RunResult, TestCase, TestOutcome, TestResult};

pub use junit::JUnitReporter;

/// A test reporter receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the plans are built, before the first test starts.
    async fn on_plan_loaded(&self, tests: &[TestCase]);

    /// Called when a test starts running.
    async fn on_test_start(&self, test: &TestCase);

    /// Called when a test completes.
    async fn on_test_complete(&self, result: &TestResult);

    /// Called when all tests have completed.
    async fn on_run_complete(&self, result: &RunResult);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_plan_loaded(&self, _tests: &[TestCase]) {}
    async fn on_test_start(&self, _test: &TestCase) {}
    async fn on_test_complete(&self, _result: &TestResult) {}
    async fn on_run_complete(&self, _result: &RunResult) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_plan_loaded(&self, tests: &[TestCase]) {
        for reporter in &self.reporters {
            reporter.on_plan_loaded(tests).await;
        }
    }

    async fn on_test_start(&self, test: &TestCase) {
        for reporter in &self.reporters {
            reporter.on_test_start(test).await;
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        for reporter in &self.reporters {
            reporter.on_test_complete(result).await;
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        for reporter in &self.reporters {
            reporter.on_run_complete(result).await;
        }
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Option<indicatif::ProgressBar>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_plan_loaded(&self, tests: &[TestCase]) {
        println!("Loaded {} tests", tests.len());

        let pb = indicatif::ProgressBar::new(tests.len() as u64);
        if let Ok(style) = indicatif::ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        *self.progress() = Some(pb);
    }

    async fn on_test_start(&self, test: &TestCase) {
        match self.progress().as_ref() {
            Some(pb) => pb.set_message(test.name().to_string()),
            None if self.verbose => println!("Running: {}", test.name()),
            None => {}
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        let status = match result.outcome {
            TestOutcome::Passed => console::style("PASS").green(),
            TestOutcome::Failed => console::style("FAIL").red(),
        };
        let line = format!("{} {} ({:.3}s)", status, result.name, result.duration.as_secs_f64());

        match self.progress().as_ref() {
            Some(pb) => {
                pb.inc(1);
                if self.verbose || !result.is_success() {
                    pb.println(line);
                }
            }
            None => println!("{}", line),
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        if let Some(pb) = self.progress().take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Test Results:");
        println!("  Total:   {}", result.total_tests);
        println!("  Passed:  {}", console::style(result.passed).green());
        println!("  Failed:  {}", console::style(result.failed).red());
        println!("  Duration: {:?}", result.duration);

        println!();
        if result.success() {
            println!("{}", console::style("All tests passed!").green().bold());
            return;
        }

        println!("{}", console::style("Some tests failed.").red().bold());
        println!();
        println!("Failed tests:");
        for r in result.results.iter().filter(|r| !r.is_success()) {
            println!("  - {}", r.name);
            if let (Some(kind), Some(message)) = (&r.error_kind, &r.error_message) {
                println!("    {}", console::style(format!("{}: {}", kind, message)).dim());
            }
            for cause in r.cause_chain.iter().rev().skip(1) {
                println!("      {}", console::style(format!("in: {}", cause)).dim());
            }
        }
    }
}
