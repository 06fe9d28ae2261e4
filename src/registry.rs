//! Explicit registry of named endpoints and capabilities.
//!
//! The registry is built once at startup and handed to the plan builder,
//! which resolves every endpoint and capability reference while building
//! the action tree. Nothing is looked up by name at execution time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::TestContext;
use crate::correlation::{EchoTransport, FaultStrategy, ReplyStore, SyncProducer};
use crate::error::{ActionError, ActionResult};

/// A typed parameter passed to a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Named parameters of a capability invocation, in declaration order.
pub type Params = IndexMap<String, ParamValue>;

/// Returns the text parameter `name`, failing when it is absent.
pub fn required_param<'a>(params: &'a Params, name: &str) -> ActionResult<&'a ParamValue> {
    params.get(name).ok_or_else(|| {
        ActionError::failed_with_kind(
            "IllegalArgumentError",
            format!("Missing parameter '{}'", name),
        )
    })
}

/// A named operation leaf actions can invoke with typed parameters.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Runs the capability. The returned value, if any, may be stored in a
    /// variable by the caller.
    async fn invoke(&self, params: &Params, context: &TestContext) -> ActionResult<Option<String>>;
}

/// Reads an environment variable (`name`), with an optional `default`.
struct EnvCapability;

#[async_trait]
impl Capability for EnvCapability {
    async fn invoke(&self, params: &Params, _context: &TestContext) -> ActionResult<Option<String>> {
        let name = required_param(params, "name")?.to_string();
        match std::env::var(&name) {
            Ok(value) => Ok(Some(value)),
            Err(_) => match params.get("default") {
                Some(default) => Ok(Some(default.to_string())),
                None => Err(ActionError::failed_with_kind(
                    "IllegalArgumentError",
                    format!("Environment variable '{}' is not set", name),
                )),
            },
        }
    }
}

/// Named endpoints and capabilities available to test plans.
#[derive(Default, Clone)]
pub struct Registry {
    endpoints: HashMap<String, Arc<SyncProducer>>,
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `echo` endpoint and `env`
    /// capability, configured from `config`.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error on an unsupported fault strategy or
    /// duplicate reply policy.
    pub fn with_builtins(config: &EngineConfig) -> ActionResult<Self> {
        let fault_strategy: FaultStrategy = config.fault_strategy.parse()?;
        let store = Arc::new(ReplyStore::new(
            Duration::from_millis(config.polling_interval_ms),
            config.duplicate_replies.parse()?,
        ));

        let mut registry = Self::new();
        registry.register_endpoint(
            SyncProducer::new(
                "echo",
                Arc::new(EchoTransport::new()),
                store,
                Duration::from_millis(config.reply_timeout_ms),
            )
            .with_fault_strategy(fault_strategy),
        );
        registry.register_capability("env", Arc::new(EnvCapability));
        Ok(registry)
    }

    /// Registers an endpoint under its own name.
    pub fn register_endpoint(&mut self, producer: SyncProducer) {
        self.endpoints
            .insert(producer.name().to_string(), Arc::new(producer));
    }

    pub fn register_capability(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.capabilities.insert(name.into(), capability);
    }

    /// Looks up an endpoint.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error for unknown names.
    pub fn endpoint(&self, name: &str) -> ActionResult<Arc<SyncProducer>> {
        self.endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::config(format!("Unknown endpoint '{}'", name)))
    }

    /// Looks up a capability.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error for unknown names.
    pub fn capability(&self, name: &str) -> ActionResult<Arc<dyn Capability>> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::config(format!("Unknown capability '{}'", name)))
    }

    pub fn endpoint_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
