//! Correlation of synchronous replies to the requests that caused them.
//!
//! A synchronous endpoint sends a request and later polls for the reply:
//!
//! ```text
//!   SendAction ──► SyncProducer::send ──► ReplyTransport::request
//!                        │                        │
//!                        │ key = Correlator(req)  │ reply / fault
//!                        ▼                        ▼
//!              context["<key name>"] = key   ReplyStore::deposit(key, reply)
//!
//!   ReceiveAction ──► SyncProducer::receive ──► ReplyStore::receive(key, timeout)
//!                                                  polls every polling_interval
//! ```
//!
//! Without a correlator every request uses [`DEFAULT_CORRELATION_KEY`], so
//! concurrent in-flight requests on the same endpoint cannot be told apart.
//! Configure a correlator on endpoints that see concurrent requests.
//!
//! Protocol faults either become a normal reply in the store
//! ([`FaultStrategy::Propagate`]) or fail the send call
//! ([`FaultStrategy::Throw`]).

pub mod correlator;
pub mod producer;
pub mod store;

use std::fmt;
use std::str::FromStr;

use crate::error::ActionError;

pub use correlator::{Correlator, DefaultCorrelator, HeaderCorrelator, DEFAULT_CORRELATION_KEY};
pub use producer::{EchoTransport, ReceiveAction, Reply, ReplyTransport, SendAction, SyncProducer};
pub use store::{DuplicateReplyPolicy, ReplyStore};

/// How protocol-level fault responses are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultStrategy {
    /// Deposit the fault as a normal reply for the receiver to inspect.
    #[default]
    Propagate,
    /// Fail the send call immediately.
    Throw,
}

impl FromStr for FaultStrategy {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" | "propagate_error" | "propagateerror" => Ok(Self::Propagate),
            "throw" | "throws_exception" | "throwsexception" => Ok(Self::Throw),
            other => Err(ActionError::config(format!(
                "Unsupported fault strategy '{}' (expected 'propagate' or 'throw')",
                other
            ))),
        }
    }
}

impl fmt::Display for FaultStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Propagate => write!(f, "propagate"),
            Self::Throw => write!(f, "throw"),
        }
    }
}
