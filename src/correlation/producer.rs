//! Synchronous request/reply endpoint and the send/receive leaf actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info};

use super::correlator::{correlation_key_name, Correlator, DEFAULT_CORRELATION_KEY};
use super::store::ReplyStore;
use super::FaultStrategy;
use crate::action::TestAction;
use crate::context::matchers::is_matcher_expression;
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};
use crate::message::Message;

/// Outcome of a request on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(Message),
    /// Protocol-level error response (SOAP fault, HTTP 5xx and similar).
    Fault(Message),
}

/// Transport that turns a request into a reply.
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn request(&self, request: &Message) -> ActionResult<Reply>;
}

/// Loopback transport replying with the request payload.
///
/// Requests whose payload starts with `FAULT` produce a fault reply.
#[derive(Debug, Default, Clone)]
pub struct EchoTransport {
    delay: Duration,
}

impl EchoTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply, simulating a slow peer.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ReplyTransport for EchoTransport {
    async fn request(&self, request: &Message) -> ActionResult<Reply> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut reply = Message::new(request.payload.clone());
        reply.headers = request.headers.clone();
        if request.payload.starts_with("FAULT") {
            Ok(Reply::Fault(reply))
        } else {
            Ok(Reply::Message(reply))
        }
    }
}

/// Client side of a synchronous endpoint.
///
/// `send` stores the reply under the request's correlation key and saves
/// that key in the context; `receive` polls the store for it.
pub struct SyncProducer {
    name: String,
    transport: Arc<dyn ReplyTransport>,
    correlator: Option<Arc<dyn Correlator>>,
    store: Arc<ReplyStore>,
    fault_strategy: FaultStrategy,
    timeout: Duration,
}

impl SyncProducer {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn ReplyTransport>,
        store: Arc<ReplyStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            correlator: None,
            store,
            fault_strategy: FaultStrategy::default(),
            timeout,
        }
    }

    pub fn with_correlator(mut self, correlator: Arc<dyn Correlator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    pub fn with_fault_strategy(mut self, strategy: FaultStrategy) -> Self {
        self.fault_strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ReplyStore {
        &self.store
    }

    fn key_name(&self) -> String {
        match &self.correlator {
            Some(correlator) => correlator.correlation_key_name(&self.name),
            None => correlation_key_name(&self.name),
        }
    }

    /// Sends `message` and stores the reply. Returns the correlation key.
    ///
    /// # Errors
    ///
    /// Fails when the transport fails, when the reply store rejects the
    /// reply, or on a fault reply under [`FaultStrategy::Throw`].
    pub async fn send(&self, message: &Message, context: &TestContext) -> ActionResult<String> {
        let key = match &self.correlator {
            Some(correlator) => correlator.correlation_key(message)?,
            None => DEFAULT_CORRELATION_KEY.to_string(),
        };
        context.set_variable(self.key_name(), key.as_str());

        info!("Sending message to endpoint '{}'", self.name);
        context.on_outbound(message);

        match self.transport.request(message).await? {
            Reply::Message(reply) => self.store.deposit(&key, reply)?,
            Reply::Fault(fault) => match self.fault_strategy {
                FaultStrategy::Propagate => {
                    debug!("Endpoint '{}' replied with a fault; propagating", self.name);
                    self.store.deposit(&key, fault)?;
                }
                FaultStrategy::Throw => {
                    return Err(ActionError::failed_with_kind(
                        "FaultError",
                        format!("Endpoint '{}' replied with fault: {}", self.name, fault.payload),
                    ));
                }
            },
        }

        Ok(key)
    }

    /// Waits for the reply to the last request sent through this endpoint
    /// in `context`, or to the request with the explicit `selector` key.
    pub async fn receive(
        &self,
        context: &TestContext,
        selector: Option<&str>,
        timeout: Option<Duration>,
    ) -> ActionResult<Message> {
        let key = match selector {
            Some(selector) => selector.to_string(),
            None => context.get_variable(&self.key_name()).map_err(|_| {
                ActionError::failed_with_kind(
                    "CorrelationError",
                    format!(
                        "No request was sent on endpoint '{}' before receiving",
                        self.name
                    ),
                )
            })?,
        };

        let reply = self
            .store
            .receive(&key, timeout.unwrap_or(self.timeout))
            .await?;
        info!("Received reply on endpoint '{}'", self.name);
        context.on_inbound(&reply);
        Ok(reply)
    }
}

/// Sends a message through a synchronous endpoint.
pub struct SendAction {
    producer: Arc<SyncProducer>,
    payload: String,
    headers: IndexMap<String, String>,
    message_name: Option<String>,
}

impl SendAction {
    pub fn new(producer: Arc<SyncProducer>, payload: impl Into<String>) -> Self {
        Self {
            producer,
            payload: payload.into(),
            headers: IndexMap::new(),
            message_name: None,
        }
    }

    pub fn with_headers(mut self, headers: IndexMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Records the sent message in the context under `name`.
    pub fn with_message_name(mut self, name: impl Into<String>) -> Self {
        self.message_name = Some(name.into());
        self
    }
}

#[async_trait]
impl TestAction for SendAction {
    fn name(&self) -> &str {
        "send"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let mut message = Message::new(context.resolve(&self.payload)?);
        for (name, value) in &self.headers {
            message
                .headers
                .insert(name.clone(), context.resolve(value)?);
        }
        if let Some(name) = &self.message_name {
            let name = context.resolve(name)?;
            message.name = Some(name.clone());
            context.messages().store(name, message.clone());
        }

        self.producer.send(&message, context).await?;
        Ok(())
    }
}

/// Receives the correlated reply from a synchronous endpoint.
///
/// The reply can be checked against an expected payload (literal or
/// `@matcher(control)@`) and parts of it copied into variables: each entry
/// of `extract` maps a variable name to either `payload` or a header name.
pub struct ReceiveAction {
    producer: Arc<SyncProducer>,
    selector: Option<String>,
    timeout: Option<Duration>,
    message_name: Option<String>,
    expected_payload: Option<String>,
    extract: IndexMap<String, String>,
}

impl ReceiveAction {
    pub fn new(producer: Arc<SyncProducer>) -> Self {
        Self {
            producer,
            selector: None,
            timeout: None,
            message_name: None,
            expected_payload: None,
            extract: IndexMap::new(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_message_name(mut self, name: impl Into<String>) -> Self {
        self.message_name = Some(name.into());
        self
    }

    pub fn with_expected_payload(mut self, expected: impl Into<String>) -> Self {
        self.expected_payload = Some(expected.into());
        self
    }

    pub fn with_extract(mut self, extract: IndexMap<String, String>) -> Self {
        self.extract = extract;
        self
    }

    fn validate(&self, reply: &Message, context: &TestContext) -> ActionResult<()> {
        let Some(expected) = &self.expected_payload else {
            return Ok(());
        };

        let expected = context.resolve(expected)?;
        let matched = if is_matcher_expression(&expected) {
            context.matchers().evaluate(&expected, &reply.payload, context)?
        } else {
            expected == reply.payload
        };

        if matched {
            Ok(())
        } else {
            Err(ActionError::failed_with_kind(
                "ValidationError",
                format!(
                    "Payload validation failed: expected '{}' but was '{}'",
                    expected, reply.payload
                ),
            ))
        }
    }
}

#[async_trait]
impl TestAction for ReceiveAction {
    fn name(&self) -> &str {
        "receive"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let selector = match &self.selector {
            Some(selector) => Some(context.resolve(selector)?),
            None => None,
        };
        let mut reply = self
            .producer
            .receive(context, selector.as_deref(), self.timeout)
            .await?;

        self.validate(&reply, context)?;

        for (variable, source) in &self.extract {
            let value = if source == "payload" {
                reply.payload.clone()
            } else {
                reply.header(source).map(str::to_string).ok_or_else(|| {
                    ActionError::failed_with_kind(
                        "ValidationError",
                        format!("Reply has no header '{}'", source),
                    )
                })?
            };
            context.set_variable(variable.as_str(), value);
        }

        if let Some(name) = &self.message_name {
            let name = context.resolve(name)?;
            reply.name = Some(name.clone());
            context.messages().store(name, reply);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::store::DuplicateReplyPolicy;
    use crate::correlation::DefaultCorrelator;
    use crate::message::MessageListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn producer(strategy: FaultStrategy) -> Arc<SyncProducer> {
        let store = Arc::new(ReplyStore::new(
            Duration::from_millis(10),
            DuplicateReplyPolicy::Queue,
        ));
        Arc::new(
            SyncProducer::new(
                "echo",
                Arc::new(EchoTransport::new()),
                store,
                Duration::from_millis(200),
            )
            .with_fault_strategy(strategy),
        )
    }

    #[tokio::test]
    async fn test_send_then_receive_round_trip() {
        let context = TestContext::standalone();
        context.set_variable("order", "42");
        let producer = producer(FaultStrategy::Propagate);

        SendAction::new(producer.clone(), "order ${order}")
            .with_message_name("request")
            .execute(&context)
            .await
            .unwrap();
        ReceiveAction::new(producer.clone())
            .with_expected_payload("order 42")
            .with_message_name("reply")
            .execute(&context)
            .await
            .unwrap();

        assert!(context.messages().contains("request"));
        assert_eq!(context.messages().get("reply").unwrap().payload, "order 42");
        assert_eq!(producer.store().pending(), 0);
    }

    #[tokio::test]
    async fn test_correlation_key_saved_in_context() {
        let context = TestContext::standalone();
        let store = Arc::new(ReplyStore::new(
            Duration::from_millis(10),
            DuplicateReplyPolicy::Queue,
        ));
        let producer = SyncProducer::new(
            "orders",
            Arc::new(EchoTransport::new()),
            store,
            Duration::from_millis(100),
        )
        .with_correlator(Arc::new(DefaultCorrelator));

        let message = Message::new("ping");
        let key = producer.send(&message, &context).await.unwrap();
        assert_eq!(
            context
                .get_variable("cadence_message_correlator_orders")
                .unwrap(),
            key
        );
        assert!(key.contains(&message.id));

        let reply = producer.receive(&context, Some(&key), None).await.unwrap();
        assert_eq!(reply.payload, "ping");
    }

    #[tokio::test]
    async fn test_fault_propagates_as_reply() {
        let context = TestContext::standalone();
        let producer = producer(FaultStrategy::Propagate);

        SendAction::new(producer.clone(), "FAULT: server down")
            .execute(&context)
            .await
            .unwrap();
        let reply = producer.receive(&context, None, None).await.unwrap();
        assert_eq!(reply.payload, "FAULT: server down");
    }

    #[tokio::test]
    async fn test_fault_throws_on_sender() {
        let context = TestContext::standalone();
        let producer = producer(FaultStrategy::Throw);

        let err = SendAction::new(producer.clone(), "FAULT")
            .execute(&context)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FaultError");
        assert_eq!(producer.store().pending(), 0);
    }

    #[tokio::test]
    async fn test_receive_without_send_fails() {
        let context = TestContext::standalone();
        let err = ReceiveAction::new(producer(FaultStrategy::Propagate))
            .execute(&context)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CorrelationError");
    }

    #[tokio::test]
    async fn test_receive_validates_and_extracts() {
        let context = TestContext::standalone();
        let producer = producer(FaultStrategy::Propagate);
        let mut headers = IndexMap::new();
        headers.insert("trace".to_string(), "t-1".to_string());

        SendAction::new(producer.clone(), "17")
            .with_headers(headers)
            .execute(&context)
            .await
            .unwrap();

        let mut extract = IndexMap::new();
        extract.insert("amount".to_string(), "payload".to_string());
        extract.insert("traceId".to_string(), "trace".to_string());
        context.set_variable("min", "10");
        ReceiveAction::new(producer.clone())
            .with_expected_payload("@greaterThan(${min})@")
            .with_extract(extract)
            .execute(&context)
            .await
            .unwrap();

        assert_eq!(context.get_variable("amount").unwrap(), "17");
        assert_eq!(context.get_variable("traceId").unwrap(), "t-1");
    }

    #[tokio::test]
    async fn test_payload_mismatch_fails_validation() {
        let context = TestContext::standalone();
        let producer = producer(FaultStrategy::Propagate);
        SendAction::new(producer.clone(), "actual")
            .execute(&context)
            .await
            .unwrap();

        let err = ReceiveAction::new(producer)
            .with_expected_payload("expected")
            .execute(&context)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
    }

    #[derive(Default)]
    struct Counting {
        inbound: AtomicUsize,
        outbound: AtomicUsize,
    }

    impl MessageListener for Counting {
        fn on_inbound(&self, _message: &Message) {
            self.inbound.fetch_add(1, Ordering::SeqCst);
        }

        fn on_outbound(&self, _message: &Message) {
            self.outbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_listeners_see_both_directions() {
        let listener = Arc::new(Counting::default());
        let context = crate::context::ContextFactory::new(crate::scheduler::Scheduler::current())
            .with_listener(listener.clone())
            .create();
        let producer = producer(FaultStrategy::Propagate);

        SendAction::new(producer.clone(), "hi")
            .execute(&context)
            .await
            .unwrap();
        ReceiveAction::new(producer).execute(&context).await.unwrap();

        assert_eq!(listener.outbound.load(Ordering::SeqCst), 1);
        assert_eq!(listener.inbound.load(Ordering::SeqCst), 1);
    }
}
