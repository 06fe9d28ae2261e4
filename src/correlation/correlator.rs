//! Correlation key derivation.

use crate::error::{ActionError, ActionResult};
use crate::message::{Message, MESSAGE_ID_HEADER};

/// Key used by endpoints without a correlator.
pub const DEFAULT_CORRELATION_KEY: &str = "cadence_default_correlation";

const CORRELATION_KEY_PREFIX: &str = "cadence_message_correlator_";

/// Derives a correlation key from an outbound request.
pub trait Correlator: Send + Sync {
    /// Computes the key for `request`. Must be deterministic.
    fn correlation_key(&self, request: &Message) -> ActionResult<String>;

    /// Name of the context variable holding the last key of `consumer`.
    fn correlation_key_name(&self, consumer: &str) -> String {
        correlation_key_name(consumer)
    }
}

/// Context variable name under which an endpoint saves its last key.
pub fn correlation_key_name(consumer: &str) -> String {
    format!("{}{}", CORRELATION_KEY_PREFIX, consumer)
}

/// Correlates on the message id.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCorrelator;

impl Correlator for DefaultCorrelator {
    fn correlation_key(&self, request: &Message) -> ActionResult<String> {
        Ok(format!("{} = '{}'", MESSAGE_ID_HEADER, request.id))
    }
}

/// Correlates on the value of a request header.
#[derive(Debug, Clone)]
pub struct HeaderCorrelator {
    header: String,
}

impl HeaderCorrelator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Correlator for HeaderCorrelator {
    fn correlation_key(&self, request: &Message) -> ActionResult<String> {
        request
            .header(&self.header)
            .map(|value| format!("{} = '{}'", self.header, value))
            .ok_or_else(|| {
                ActionError::failed_with_kind(
                    "CorrelationError",
                    format!("Request has no correlation header '{}'", self.header),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_correlator_uses_message_id() {
        let message = Message::new("ping");
        let key = DefaultCorrelator.correlation_key(&message).unwrap();
        assert_eq!(key, format!("cadence_message_id = '{}'", message.id));
        assert_eq!(DefaultCorrelator.correlation_key(&message).unwrap(), key);
        assert_eq!(
            DefaultCorrelator.correlation_key_name("orders"),
            "cadence_message_correlator_orders"
        );
    }

    #[test]
    fn test_header_correlator() {
        let correlator = HeaderCorrelator::new("conversation");
        let message = Message::new("ping").with_header("conversation", "c-1");
        assert_eq!(
            correlator.correlation_key(&message).unwrap(),
            "conversation = 'c-1'"
        );

        let err = correlator.correlation_key(&Message::new("x")).unwrap_err();
        assert_eq!(err.kind(), "CorrelationError");
    }
}
