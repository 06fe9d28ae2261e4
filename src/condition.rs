//! Conditions polled by Wait, and the index conditions of loop containers.
//!
//! | Variant | Satisfied when |
//! |---------|----------------|
//! | `Expression` | the resolved boolean expression is true |
//! | `FileExists` | the resolved path exists |
//! | `HttpProbe` | the URL answers with the expected status |
//! | `MessageArrived` | a message with that name was recorded in the context |
//! | `ActionSucceeds` | the nested action runs without failure |
//!
//! Transport and IO problems while probing count as "not yet satisfied".
//! Only malformed conditions fail with an error.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::action::ActionRef;
use crate::context::matchers::is_matcher_expression;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};
use crate::expression;

/// Default per-request timeout of HTTP probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A predicate evaluated against the test context.
pub enum Condition {
    /// Boolean expression, resolved before evaluation.
    Expression(String),
    /// File or directory path, resolved before checking.
    FileExists(String),
    HttpProbe {
        url: String,
        method: String,
        status: u16,
        timeout: Duration,
    },
    MessageArrived(String),
    ActionSucceeds(ActionRef),
}

impl Condition {
    /// HTTP probe expecting `200` from a `HEAD` request.
    pub fn http(url: impl Into<String>) -> Self {
        Self::HttpProbe {
            url: url.into(),
            method: "HEAD".to_string(),
            status: 200,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Evaluates the condition once.
    ///
    /// # Errors
    ///
    /// Fails when the condition cannot be evaluated, for example on an
    /// invalid expression or an unknown variable.
    pub async fn is_satisfied(&self, context: &TestContext) -> ActionResult<bool> {
        match self {
            Self::Expression(expr) => expression::evaluate(&context.resolve(expr)?),
            Self::FileExists(path) => {
                let path = context.resolve(path)?;
                debug!("Checking file path '{}'", path);
                Ok(tokio::fs::try_exists(Path::new(&path)).await.unwrap_or(false))
            }
            Self::HttpProbe {
                url,
                method,
                status,
                timeout,
            } => probe(&context.resolve(url)?, method, *status, *timeout).await,
            Self::MessageArrived(name) => {
                let name = context.resolve(name)?;
                debug!("Checking message store for '{}'", name);
                Ok(context.messages().contains(&name))
            }
            Self::ActionSucceeds(action) => match action.execute(context).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    debug!("Nested action '{}' failed: {}", action.name(), e);
                    Ok(false)
                }
            },
        }
    }

    /// Human readable description used in timeout messages.
    pub fn description(&self) -> String {
        match self {
            Self::Expression(expr) => format!("expression '{}' to be true", expr),
            Self::FileExists(path) => format!("file '{}' to exist", path),
            Self::HttpProbe {
                url, method, status, ..
            } => format!("{} {} to return {}", method, url, status),
            Self::MessageArrived(name) => format!("message '{}' to arrive", name),
            Self::ActionSucceeds(action) => format!("action '{}' to succeed", action.name()),
        }
    }
}

async fn probe(url: &str, method: &str, status: u16, timeout: Duration) -> ActionResult<bool> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ActionError::config(format!("Invalid HTTP method '{}'", method)))?;
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ActionError::config(format!("Unable to build HTTP client: {}", e)))?;

    match client.request(method, url).send().await {
        Ok(response) => {
            let actual = response.status().as_u16();
            debug!("Probe of {} returned {}", url, actual);
            Ok(actual == status)
        }
        Err(e) => {
            debug!("Probe of {} failed: {}", url, e);
            Ok(false)
        }
    }
}

/// Loop condition of an Iterate or repeat container.
///
/// The condition is either a matcher expression such as `@lowerThan(5)@`,
/// applied to the index, or a boolean expression in which whole-word
/// occurrences of the index name stand for the index value (`i lt 5`).
/// The word pattern for the index name is compiled once, up front.
pub struct IndexCondition {
    condition: String,
    index_name: String,
    word: Result<Regex, regex::Error>,
}

impl IndexCondition {
    pub fn new(condition: impl Into<String>, index_name: impl Into<String>) -> Self {
        let index_name = index_name.into();
        Self {
            condition: condition.into(),
            word: Regex::new(&format!(r"\b{}\b", regex::escape(&index_name))),
            index_name,
        }
    }

    /// Same condition with the index under another name.
    pub fn with_index_name(self, index_name: impl Into<String>) -> Self {
        Self::new(self.condition, index_name)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Evaluates the condition for `index`.
    pub fn evaluate(&self, index: i64, context: &TestContext) -> ActionResult<bool> {
        let resolved = context.resolve(&self.condition)?;
        if is_matcher_expression(&resolved) {
            return context
                .matchers()
                .evaluate(&resolved, &index.to_string(), context);
        }

        let word = self.word.as_ref().map_err(|e| {
            ActionError::config(format!("Invalid index name '{}': {}", self.index_name, e))
        })?;
        let substituted = word.replace_all(&resolved, index.to_string().as_str());
        expression::evaluate(&substituted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{FailAction, SleepAction};
    use crate::message::Message;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_expression_condition_resolves_variables() {
        let context = TestContext::standalone();
        context.set_variable("status", "done");
        let condition = Condition::Expression("${status} = done".into());
        assert!(condition.is_satisfied(&context).await.unwrap());

        context.set_variable("status", "running");
        assert!(!condition.is_satisfied(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_exists_condition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ready.flag");
        let context = TestContext::standalone();
        context.set_variable("flag", path.to_string_lossy().to_string());

        let condition = Condition::FileExists("${flag}".into());
        assert!(!condition.is_satisfied(&context).await.unwrap());
        std::fs::write(&path, b"ok").unwrap();
        assert!(condition.is_satisfied(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_message_arrived_condition() {
        let context = TestContext::standalone();
        let condition = Condition::MessageArrived("reply".into());
        assert!(!condition.is_satisfied(&context).await.unwrap());

        context.messages().store("reply", Message::new("payload"));
        assert!(condition.is_satisfied(&context).await.unwrap());
        assert_eq!(condition.description(), "message 'reply' to arrive");
    }

    #[tokio::test]
    async fn test_action_succeeds_condition() {
        let context = TestContext::standalone();
        let ok = Condition::ActionSucceeds(Arc::new(SleepAction::new(Duration::ZERO)));
        let failing = Condition::ActionSucceeds(Arc::new(FailAction::new("nope")));

        assert!(ok.is_satisfied(&context).await.unwrap());
        assert!(!failing.is_satisfied(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_probe_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });

        let context = TestContext::standalone();
        let up = Condition::http(format!("http://{}/health", addr));
        assert!(up.is_satisfied(&context).await.unwrap());

        let wrong_status = Condition::HttpProbe {
            url: format!("http://{}/health", addr),
            method: "GET".into(),
            status: 204,
            timeout: DEFAULT_PROBE_TIMEOUT,
        };
        assert!(!wrong_status.is_satisfied(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_http_probe_unreachable_is_not_satisfied() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let context = TestContext::standalone();
        let condition = Condition::http(format!("http://{}/", addr));
        assert!(!condition.is_satisfied(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_index_condition_word_replacement() {
        let context = TestContext::standalone();
        let below_five = IndexCondition::new("i lt 5", "i");
        assert!(below_five.evaluate(3, &context).unwrap());
        assert!(!below_five.evaluate(5, &context).unwrap());
        // "in" is not the index
        let quoted = IndexCondition::new("'in' = 'in' and i = 2", "i");
        assert!(quoted.evaluate(2, &context).unwrap());

        context.set_variable("max", "4");
        let renamed = IndexCondition::new("index lt= ${max}", "i").with_index_name("index");
        assert_eq!(renamed.index_name(), "index");
        assert!(renamed.evaluate(4, &context).unwrap());
    }

    #[tokio::test]
    async fn test_index_condition_matcher_expression() {
        let context = TestContext::standalone();
        let condition = IndexCondition::new("@lowerThan(3)@", "i");
        assert!(condition.evaluate(2, &context).unwrap());
        assert!(!condition.evaluate(3, &context).unwrap());
    }
}
