//! Keyed store of replies awaiting their receiver.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ActionError, ActionResult};
use crate::message::Message;

/// What happens when a reply arrives for a key that still holds an
/// unconsumed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateReplyPolicy {
    /// Keep replies in arrival order; each receive consumes the oldest.
    #[default]
    Queue,
    /// Refuse the second reply and keep the first.
    Reject,
}

impl FromStr for DuplicateReplyPolicy {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(ActionError::config(format!(
                "Unsupported duplicate reply policy '{}' (expected 'queue' or 'reject')",
                other
            ))),
        }
    }
}

impl fmt::Display for DuplicateReplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Replies keyed by correlation key, consumed at most once.
pub struct ReplyStore {
    replies: Mutex<HashMap<String, VecDeque<Message>>>,
    polling_interval: Duration,
    policy: DuplicateReplyPolicy,
}

impl ReplyStore {
    pub fn new(polling_interval: Duration, policy: DuplicateReplyPolicy) -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            polling_interval,
            policy,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn policy(&self) -> DuplicateReplyPolicy {
        self.policy
    }

    /// Stores a reply under `key`.
    ///
    /// # Errors
    ///
    /// With [`DuplicateReplyPolicy::Reject`], fails with
    /// [`ActionError::DuplicateReply`] if `key` holds an unconsumed reply.
    pub fn deposit(&self, key: &str, message: Message) -> ActionResult<()> {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = replies.entry(key.to_string()).or_default();
        if self.policy == DuplicateReplyPolicy::Reject && !queue.is_empty() {
            return Err(ActionError::DuplicateReply(key.to_string()));
        }
        debug!("Saving reply for correlation key '{}'", key);
        queue.push_back(message);
        Ok(())
    }

    /// Removes and returns the oldest reply for `key` without waiting.
    pub fn try_take(&self, key: &str) -> Option<Message> {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = replies.get_mut(key)?;
        let message = queue.pop_front();
        if queue.is_empty() {
            replies.remove(key);
        }
        message
    }

    /// Waits for a reply under `key` and consumes it.
    ///
    /// The store is polled every polling interval; the deadline is measured
    /// from the call.
    ///
    /// # Errors
    ///
    /// Fails with [`ActionError::Timeout`] when no reply arrives in time.
    pub async fn receive(&self, key: &str, timeout: Duration) -> ActionResult<Message> {
        let start = Instant::now();
        loop {
            if let Some(message) = self.try_take(key) {
                return Ok(message);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ActionError::Timeout {
                    what: format!("reply with correlation key '{}'", key),
                    elapsed,
                });
            }

            let pause = self.polling_interval.min(timeout - elapsed);
            debug!(
                "Reply message did not arrive yet - retrying in {}ms",
                pause.as_millis()
            );
            tokio::time::sleep(pause).await;
        }
    }

    /// Number of unconsumed replies across all keys.
    pub fn pending(&self) -> usize {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}
