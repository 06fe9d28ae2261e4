//! Messages exchanged with endpoints, and the listener fan-out.
//!
//! The engine treats message payloads as opaque text. Messages are recorded
//! in the [`MessageStore`] of a test context under a name so that later
//! actions and the message-arrived condition can find them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Header carrying the unique message id.
pub const MESSAGE_ID_HEADER: &str = "cadence_message_id";

/// A message sent to or received from an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (UUID v4 unless set explicitly).
    pub id: String,

    /// Optional name used when storing the message in the context.
    #[serde(default)]
    pub name: Option<String>,

    /// Message headers, sorted by name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Message payload.
    #[serde(default)]
    pub payload: String,
}

impl Message {
    /// Creates a message with a fresh id and the given payload.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    /// Sets the message name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Looks up a header, falling back to the message id for [`MESSAGE_ID_HEADER`].
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(value) => Some(value.as_str()),
            None if name == MESSAGE_ID_HEADER => Some(self.id.as_str()),
            None => None,
        }
    }
}

/// Direction of a message relative to the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Observer notified about every inbound and outbound message.
///
/// Listeners receive borrowed messages; no ownership is transferred.
pub trait MessageListener: Send + Sync {
    fn on_inbound(&self, message: &Message);

    fn on_outbound(&self, message: &Message);
}

/// Fan-out over a set of message listeners.
#[derive(Clone, Default)]
pub struct MessageListeners {
    listeners: Vec<Arc<dyn MessageListener>>,
}

impl MessageListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Arc<dyn MessageListener>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&self, direction: MessageDirection, message: &Message) {
        for listener in &self.listeners {
            match direction {
                MessageDirection::Inbound => listener.on_inbound(message),
                MessageDirection::Outbound => listener.on_outbound(message),
            }
        }
    }
}

/// Named messages recorded during a test.
#[derive(Default)]
pub struct MessageStore {
    messages: Mutex<HashMap<String, Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message, replacing any earlier message with the same name.
    pub fn store(&self, name: impl Into<String>, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), message);
    }

    pub fn get(&self, name: &str) -> Option<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
