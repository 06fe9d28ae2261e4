use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};

/// Selects failures by kind and, optionally, by message.
///
/// The kind matches if any error in the cause chain has it, so a kind
/// wrapped by a retry or an aggregate is still found. The message pattern
/// is searched in the outermost error's message.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    kind: Option<String>,
    message: Option<Regex>,
}

impl ErrorFilter {
    /// Matches every failure.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            message: None,
        }
    }

    /// Adds a message pattern.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when `pattern` is not a valid regex.
    pub fn with_message(mut self, pattern: &str) -> ActionResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            ActionError::config(format!("Invalid message pattern '{}': {}", pattern, e))
        })?;
        self.message = Some(regex);
        Ok(self)
    }

    pub fn matches(&self, error: &ActionError) -> bool {
        let kind_matches = match &self.kind {
            None => true,
            Some(kind) => {
                let mut current = Some(error);
                let mut found = false;
                while let Some(e) = current {
                    if e.kind() == kind {
                        found = true;
                        break;
                    }
                    current = e.inner();
                }
                found
            }
        };

        kind_matches
            && self
                .message
                .as_ref()
                .is_none_or(|regex| regex.is_match(&error.to_string()))
    }
}

impl fmt::Display for ErrorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_deref().unwrap_or("any error"))?;
        if let Some(message) = &self.message {
            write!(f, " with message matching '{}'", message)?;
        }
        Ok(())
    }
}

/// Runs children and suppresses failures matching a filter.
pub struct Catch {
    actions: Vec<ActionRef>,
    filter: ErrorFilter,
}

impl Catch {
    pub fn new(filter: ErrorFilter, actions: Vec<ActionRef>) -> Self {
        Self { actions, filter }
    }
}

#[async_trait]
impl TestAction for Catch {
    fn name(&self) -> &str {
        "catch"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        match run_sequence(&self.actions, context).await {
            Err(e) if self.filter.matches(&e) => {
                info!("Caught exception {}: {}", e.kind(), e);
                Ok(())
            }
            other => other,
        }
    }
}
