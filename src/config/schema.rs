//! Configuration schema definitions for cadence.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── EngineConfig   - Worker pool, join/drain bounds, correlation settings
//! └── ReportConfig   - Output and reporting settings
//! ```
//!
//! Both tables are optional; every field has a default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure for cadence.
///
/// # TOML Structure
///
/// ```toml
/// [engine]
/// max_workers = 4
/// async_timeout_ms = 10000
/// fault_strategy = "propagate"
///
/// [report]
/// output_dir = "test-results"
/// ```
///
/// # Example
///
/// ```
/// use cadence::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [engine]
///     max_workers = 2
/// "#).unwrap();
/// assert_eq!(config.engine.max_workers, 2);
/// assert!(config.report.junit);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Execution engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Report configuration for output generation.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Execution engine settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_workers` | 4 |
/// | `async_timeout_ms` | 10000 |
/// | `drain_timeout_ms` | 5000 |
/// | `reply_timeout_ms` | 5000 |
/// | `polling_interval_ms` | 500 |
/// | `duplicate_replies` | `"queue"` |
/// | `fault_strategy` | `"propagate"` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Worker threads backing Parallel, Async and Timer.
    ///
    /// Default: 4
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Upper bound on the end-of-test wait for Async branches, in ms.
    ///
    /// Default: 10000
    #[serde(default = "default_async_timeout")]
    pub async_timeout_ms: u64,

    /// Upper bound on joining outstanding tasks at shutdown, in ms. Tasks
    /// still running afterwards are aborted.
    ///
    /// Default: 5000
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,

    /// Default timeout of a correlated receive, in ms.
    ///
    /// Default: 5000
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Polling interval of the reply store, in ms.
    ///
    /// Default: 500
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,

    /// `queue` or `reject`; see the correlation module.
    ///
    /// Default: `"queue"`
    #[serde(default = "default_duplicate_replies")]
    pub duplicate_replies: String,

    /// `propagate` or `throw`. Any other value is rejected when the
    /// endpoints are built.
    ///
    /// Default: `"propagate"`
    #[serde(default = "default_fault_strategy")]
    pub fault_strategy: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            async_timeout_ms: default_async_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            polling_interval_ms: default_polling_interval(),
            duplicate_replies: default_duplicate_replies(),
            fault_strategy: default_fault_strategy(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_async_timeout() -> u64 {
    10_000
}

fn default_drain_timeout() -> u64 {
    5_000
}

fn default_reply_timeout() -> u64 {
    5_000
}

fn default_polling_interval() -> u64 {
    500
}

fn default_duplicate_replies() -> String {
    "queue".to_string()
}

fn default_fault_strategy() -> String {
    "propagate".to_string()
}

/// Report configuration.
///
/// # Example
///
/// ```toml
/// [report]
/// output_dir = "test-results"
/// junit = true
/// junit_file = "junit.xml"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory where report files are written.
    ///
    /// Created automatically if it doesn't exist.
    ///
    /// Default: `"test-results"`
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,

    /// Whether to generate JUnit XML report.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub junit: bool,

    /// Filename for the JUnit XML report.
    ///
    /// Written to `{output_dir}/{junit_file}`.
    ///
    /// Default: `"junit.xml"`
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
            junit: true,
            junit_file: default_junit_file(),
        }
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_true() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}
