//! JUnit XML report generation.
//!
//! Generates JUnit XML format test reports, which are the de facto standard
//! for CI/CD systems.
//!
//! # Format
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="2" failures="1" errors="0" time="1.234">
//!   <testsuite name="cadence" tests="2" failures="1" errors="0" skipped="0" time="1.234">
//!     <testcase classname="cadence" name="order-roundtrip" time="0.100"/>
//!     <testcase classname="cadence" name="retry-flaky" time="0.150">
//!       <failure message="connection refused" type="IoError">
//!         Retry exhausted after 3 attempts: connection refused
//!           caused by: connection refused
//!       </failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! # Example
//!
//! ```
//! use cadence::report::JUnitReporter;
//!
//! let reporter = JUnitReporter::new("test-results/junit.xml".into())
//!     .with_testsuite_name("checkout-flows");
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::Reporter;
use crate::orchestrator::{RunResult, TestCase, TestOutcome, TestResult};

/// Reporter that writes a JUnit XML file when the run completes.
///
/// The file is created or overwritten at the given path. Parent directories
/// are created automatically if they don't exist.
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    /// Creates a new JUnit reporter that writes to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "cadence".to_string(),
        }
    }

    /// Sets the test suite name in the XML output.
    ///
    /// The default name is `"cadence"`. It is also used as the classname of
    /// every test case.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Generate JUnit XML content from results.
    fn generate_xml(&self, run_result: &RunResult) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = run_result.total_tests.to_string();
        let failures = run_result.failed.to_string();
        let time = format!("{:.3}", run_result.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("errors", "0"));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", "0"));
        testsuite.push_attribute(("skipped", "0"));
        testsuite.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for result in &run_result.results {
            self.write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }

    /// Write a single test case element.
    fn write_testcase<W: std::io::Write>(
        &self,
        writer: &mut Writer<W>,
        result: &TestResult,
    ) -> anyhow::Result<()> {
        let name = sanitize(&result.name);
        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute(("classname", self.testsuite_name.as_str()));
        testcase.push_attribute(("name", name.as_str()));
        testcase.push_attribute((
            "time",
            format!("{:.3}", result.duration.as_secs_f64()).as_str(),
        ));

        match result.outcome {
            TestOutcome::Passed => {
                writer.write_event(Event::Empty(testcase))?;
            }
            TestOutcome::Failed => {
                writer.write_event(Event::Start(testcase))?;

                let message = sanitize(result.error_message.as_deref().unwrap_or_default());
                let kind = sanitize(result.error_kind.as_deref().unwrap_or("ActionError"));
                let mut failure = BytesStart::new("failure");
                failure.push_attribute(("message", message.as_str()));
                failure.push_attribute(("type", kind.as_str()));
                writer.write_event(Event::Start(failure))?;

                let trace = sanitize(&result.cause_chain.join("\n  caused by: "));
                if !trace.is_empty() {
                    writer.write_event(Event::Text(BytesText::new(&trace)))?;
                }

                writer.write_event(Event::End(BytesEnd::new("failure")))?;
                writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_plan_loaded(&self, _tests: &[TestCase]) {}

    async fn on_test_start(&self, _test: &TestCase) {}

    async fn on_test_complete(&self, _result: &TestResult) {}

    async fn on_run_complete(&self, result: &RunResult) {
        match self.generate_xml(result) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}

/// Removes characters that are not allowed in XML 1.0 documents.
///
/// Escaping of markup characters is left to the writer.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}
