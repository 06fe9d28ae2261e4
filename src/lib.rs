//! cadence: a test action orchestration engine.
//!
//! Test cases are trees of actions. Leaves do the work (send a message,
//! invoke a capability, sleep); containers decide how, when and how often
//! their children run.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Context**: Per-test variables, functions, matchers, timers and
//!   forked-branch bookkeeping
//! - **Containers**: Sequence, Parallel, Async, Iterate, repeat loops,
//!   Timer, Wait, Catch, Assert and Conditional
//! - **Scheduler**: Worker pool and timer scheduling behind the concurrent
//!   containers
//! - **Correlation**: Reply store and synchronous endpoints matching
//!   replies to requests
//! - **Plan / Orchestrator / Report**: TOML test plans, the test lifecycle
//!   and result reporting
//!
//! # Example
//!
//! ```no_run
//! use cadence::config::load_config;
//! use cadence::plan::load_plan;
//! use cadence::registry::Registry;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("cadence.toml"))?;
//!     let registry = Registry::with_builtins(&config.engine)?;
//!     let tests = load_plan(std::path::Path::new("plan.toml"))?.build(&registry)?;
//!     println!("{} tests", tests.len());
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod condition;
pub mod config;
pub mod container;
pub mod context;
pub mod correlation;
pub mod error;
pub mod expression;
pub mod message;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod report;
pub mod scheduler;

// Re-export commonly used types
pub use action::{ActionRef, TestAction};
pub use config::{Config, load_config};
pub use context::{ContextFactory, TestContext};
pub use error::{ActionError, ActionResult};
pub use orchestrator::{Orchestrator, RunResult, TestCase, TestOutcome, TestResult};
pub use report::Reporter;
pub use scheduler::Scheduler;
