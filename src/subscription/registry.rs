//! Subscription table and inbound dispatcher.
//!
//! Entries live in one of two maps: `pending`, keyed by the client request id
//! of the subscribe call, and `active`, keyed by the server-assigned
//! subscription id once the confirmation arrives. CANCELLING entries stay in
//! `active` until the unsubscribe acknowledgement, which is correlated through
//! the unsubscribe request's own id (`unsubscribing`).
//!
//! Every table operation happens under a single mutex. Callbacks never run
//! under it: each subscription owns a queue drained by its own task, so a
//! slow callback only delays its own notifications.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::events::ClientEvent;
use super::topics::Topic;
use crate::error::{Error, Result};
use crate::rpc::envelope::{InboundMessage, JsonRpcError, RequestBuilder};
use crate::transport::Transport;

/// Caller-supplied notification handler. Receives the notification's `result` payload.
pub type Callback = Box<dyn FnMut(Value) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribe sent, confirmation not yet received
    Pending,
    /// Confirmation received, subscription id bound
    Active,
    /// Unsubscribe sent, acknowledgement not yet received
    Cancelling,
    /// Not in the table: acknowledged, retired, torn down, or never issued
    Closed,
}

/// Outcome of handling one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Confirmed { request_id: u64, subscription_id: u64 },
    Rejected { request_id: u64 },
    Unsubscribed { subscription_id: u64 },
    /// Payload queued for the callback; `retired` is set for single-shot topics
    Delivered { subscription_id: u64, retired: bool },
    /// Notification for an id with no ACTIVE entry
    Dropped { subscription_id: u64 },
    /// Response to a request this registry did not issue or no longer tracks
    Ignored { request_id: u64 },
}

struct Entry {
    request_id: u64,
    topic: Topic,
    state: SubscriptionState,
    queue: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct Table {
    pending: HashMap<u64, Entry>,
    active: HashMap<u64, Entry>,
    /// unsubscribe request id -> subscription id
    unsubscribing: HashMap<u64, u64>,
}

/// Maps subscribe calls to server-assigned ids and routes notifications to callbacks
pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    builder: Arc<RequestBuilder>,
    table: Mutex<Table>,
    events: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("pending", &self.pending_count())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        builder: Arc<RequestBuilder>,
        events: Option<mpsc::UnboundedSender<ClientEvent>>,
    ) -> Self {
        Self {
            transport,
            builder,
            table: Mutex::new(Table::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A panic while holding the lock leaves the maps structurally valid.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Sends `<topic>Subscribe` and registers `callback` as PENDING.
    ///
    /// Returns the client request id without waiting for the confirmation.
    /// Must be called from within a tokio runtime; the callback runs on a task
    /// spawned here.
    #[instrument(skip(self, params, callback))]
    pub fn subscribe(&self, topic: Topic, params: Vec<Value>, callback: Callback) -> Result<u64> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Configuration("subscribe must be called inside a tokio runtime".to_string()))?;

        let request = self.builder.build(topic.subscribe_method(), params);
        let request_id = request.id;
        let text = request.to_text()?;

        let (queue, receiver) = mpsc::unbounded_channel();
        runtime.spawn(run_callback(topic, request_id, receiver, callback));

        self.lock().pending.insert(
            request_id,
            Entry {
                request_id,
                topic,
                state: SubscriptionState::Pending,
                queue,
            },
        );

        if let Err(e) = self.transport.send(text) {
            // Dropping the entry also ends its callback task.
            self.lock().pending.remove(&request_id);
            warn!(error = %e, request_id, "Failed to send {} request", topic.subscribe_method());
            return Err(e);
        }

        debug!(request_id, "Sent {} request", topic.subscribe_method());
        Ok(request_id)
    }

    /// Sends `<topic>Unsubscribe` for an ACTIVE subscription and marks it CANCELLING.
    ///
    /// The entry is removed when the acknowledgement arrives.
    #[instrument(skip(self))]
    pub fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.unsubscribe_matching(subscription_id, None)
    }

    /// Like [`SubscriptionRegistry::unsubscribe`], but the subscription must belong to `topic`
    #[instrument(skip(self))]
    pub fn unsubscribe_topic(&self, topic: Topic, subscription_id: u64) -> Result<()> {
        self.unsubscribe_matching(subscription_id, Some(topic))
    }

    fn unsubscribe_matching(&self, subscription_id: u64, expected: Option<Topic>) -> Result<()> {
        let (text, unsubscribe_id, topic) = {
            let mut guard = self.lock();
            let table = &mut *guard;
            let entry = table
                .active
                .get_mut(&subscription_id)
                .filter(|e| e.state == SubscriptionState::Active)
                .filter(|e| expected.map_or(true, |t| t == e.topic))
                .ok_or(Error::UnknownSubscription(subscription_id))?;

            let request = self
                .builder
                .build(entry.topic.unsubscribe_method(), vec![json!(subscription_id)]);
            let text = request.to_text()?;
            entry.state = SubscriptionState::Cancelling;
            table.unsubscribing.insert(request.id, subscription_id);
            (text, request.id, entry.topic)
        };

        if let Err(e) = self.transport.send(text) {
            let mut guard = self.lock();
            let table = &mut *guard;
            table.unsubscribing.remove(&unsubscribe_id);
            if let Some(entry) = table.active.get_mut(&subscription_id) {
                if entry.state == SubscriptionState::Cancelling {
                    entry.state = SubscriptionState::Active;
                }
            }
            warn!(error = %e, subscription_id, "Failed to send {} request", topic.unsubscribe_method());
            return Err(e);
        }

        debug!(subscription_id, request_id = unsubscribe_id, "Sent {} request", topic.unsubscribe_method());
        Ok(())
    }

    /// Single entry point for inbound traffic.
    ///
    /// Errors are already logged and published as [`ClientEvent::ProtocolError`];
    /// callers keep dispatching after one.
    pub fn on_message(&self, text: &str) -> Result<Dispatch> {
        let result = match InboundMessage::parse(text) {
            Ok(InboundMessage::Response { id, outcome }) => self.handle_response(id, outcome),
            Ok(InboundMessage::Notification {
                method,
                subscription,
                result,
            }) => Ok(self.handle_notification(&method, subscription, result)),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(error = %e, message = %text, "Failed to handle WebSocket message");
            self.emit(ClientEvent::ProtocolError { error: e.to_string() });
        }
        result
    }

    fn handle_response(&self, id: u64, outcome: std::result::Result<Value, JsonRpcError>) -> Result<Dispatch> {
        let mut guard = self.lock();
        let table = &mut *guard;

        if let Some(mut entry) = table.pending.remove(&id) {
            let topic = entry.topic;
            return match outcome {
                Ok(value) => {
                    let subscription_id = value.as_u64().ok_or_else(|| {
                        Error::Protocol(format!("{} for request {} returned non-integer result {}", topic.subscribe_method(), id, value))
                    })?;
                    if table.active.contains_key(&subscription_id) {
                        return Err(Error::Protocol(format!(
                            "subscription id {} confirmed for request {} is already in use",
                            subscription_id, id
                        )));
                    }
                    entry.state = SubscriptionState::Active;
                    table.active.insert(subscription_id, entry);
                    drop(guard);

                    info!("Subscription confirmed: request_id={}, subscription_id={}", id, subscription_id);
                    self.emit(ClientEvent::Confirmed {
                        request_id: id,
                        subscription_id,
                        topic,
                    });
                    Ok(Dispatch::Confirmed {
                        request_id: id,
                        subscription_id,
                    })
                }
                Err(error) => {
                    drop(guard);
                    warn!("{} rejected for request {}: {} - {}", topic.subscribe_method(), id, error.code, error.message);
                    self.emit(ClientEvent::SubscribeRejected {
                        request_id: id,
                        topic,
                        code: error.code,
                        message: error.message,
                    });
                    Ok(Dispatch::Rejected { request_id: id })
                }
            };
        }

        if let Some(subscription_id) = table.unsubscribing.remove(&id) {
            let removed = table.active.remove(&subscription_id);
            drop(guard);

            match &outcome {
                Ok(Value::Bool(true)) => {}
                Ok(other) => warn!(subscription_id, "Unexpected unsubscribe acknowledgement: {}", other),
                // The server no longer knows the id, which is the state we wanted.
                Err(error) => warn!(subscription_id, "Unsubscribe answered with error {} - {}", error.code, error.message),
            }
            if let Some(entry) = removed {
                info!(subscription_id, "Unsubscribed from {}", entry.topic);
                self.emit(ClientEvent::Unsubscribed {
                    subscription_id,
                    topic: entry.topic,
                });
            }
            return Ok(Dispatch::Unsubscribed { subscription_id });
        }

        debug!(request_id = id, "Ignoring response to an untracked request");
        Ok(Dispatch::Ignored { request_id: id })
    }

    fn handle_notification(&self, method: &str, subscription_id: u64, result: Value) -> Dispatch {
        let mut table = self.lock();

        let Some(entry) = table.active.get(&subscription_id) else {
            debug!(subscription_id, method, "Dropping notification for unknown subscription");
            return Dispatch::Dropped { subscription_id };
        };
        if entry.state != SubscriptionState::Active {
            debug!(subscription_id, method, "Dropping notification for cancelling subscription");
            return Dispatch::Dropped { subscription_id };
        }

        let topic = entry.topic;
        if method != topic.notification_method() {
            warn!(subscription_id, method, expected = topic.notification_method(), "Notification method does not match subscription topic");
        }

        let retired = topic.is_final_notification(&result);
        // Queued under the lock so nothing is queued after a CANCELLING transition.
        if entry.queue.send(result).is_err() {
            warn!(subscription_id, "Callback task for subscription has stopped");
        }

        if retired {
            table.active.remove(&subscription_id);
            table.unsubscribing.retain(|_, id| *id != subscription_id);
        }
        drop(table);

        debug!(subscription_id, "Dispatched {}", method);
        if retired {
            debug!(subscription_id, "Retired single-shot {} subscription", topic);
            self.emit(ClientEvent::Retired { subscription_id, topic });
        }
        Dispatch::Delivered {
            subscription_id,
            retired,
        }
    }

    /// Removes a subscription without contacting the server. Returns false if
    /// it was already gone, so repeated calls are harmless.
    pub fn retire(&self, subscription_id: u64) -> bool {
        let mut table = self.lock();
        table.unsubscribing.retain(|_, id| *id != subscription_id);
        table.active.remove(&subscription_id).is_some()
    }

    /// Closes every subscription, e.g. after the connection dropped. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let mut table = self.lock();
        let closed = table.pending.len() + table.active.len();
        table.pending.clear();
        table.active.clear();
        table.unsubscribing.clear();
        closed
    }

    /// State of a subscription by server id
    pub fn state_of(&self, subscription_id: u64) -> SubscriptionState {
        self.lock()
            .active
            .get(&subscription_id)
            .map_or(SubscriptionState::Closed, |e| e.state)
    }

    /// State of a subscription by the client request id returned from `subscribe`
    pub fn state_of_request(&self, request_id: u64) -> SubscriptionState {
        let table = self.lock();
        if let Some(entry) = table.pending.get(&request_id) {
            return entry.state;
        }
        table
            .active
            .values()
            .find(|e| e.request_id == request_id)
            .map_or(SubscriptionState::Closed, |e| e.state)
    }

    /// Server-assigned id for a confirmed subscribe request
    pub fn subscription_id_for(&self, request_id: u64) -> Option<u64> {
        self.lock()
            .active
            .iter()
            .find(|(_, e)| e.request_id == request_id)
            .map(|(id, _)| *id)
    }

    pub fn topic_of(&self, subscription_id: u64) -> Option<Topic> {
        self.lock().active.get(&subscription_id).map(|e| e.topic)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// ACTIVE and CANCELLING subscriptions
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

async fn run_callback(topic: Topic, request_id: u64, mut receiver: mpsc::UnboundedReceiver<Value>, mut callback: Callback) {
    while let Some(payload) = receiver.recv().await {
        callback(payload);
    }
    debug!(request_id, "Callback task for {} subscription finished", topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn registry_with(transport: Arc<MockTransport>) -> (SubscriptionRegistry, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = SubscriptionRegistry::new(transport, Arc::new(RequestBuilder::new()), Some(tx));
        (registry, rx)
    }

    /// Callback that forwards payloads into a channel the test can await
    fn forwarding() -> (Callback, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: Callback = Box::new(move |payload| {
            let _ = tx.send(payload);
        });
        (callback, rx)
    }

    fn confirmation(request_id: u64, subscription_id: u64) -> String {
        json!({"jsonrpc": "2.0", "result": subscription_id, "id": request_id}).to_string()
    }

    fn notification(method: &str, subscription_id: u64, result: Value) -> String {
        json!({"jsonrpc": "2.0", "method": method, "params": {"subscription": subscription_id, "result": result}}).to_string()
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("callback was not invoked")
            .expect("callback channel closed")
    }

    #[tokio::test]
    async fn test_account_subscribe_confirm_notify() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport.clone());
        let (callback, mut payloads) = forwarding();

        let pubkey = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
        let request_id = registry
            .subscribe(Topic::Account, vec![json!(pubkey), json!({"encoding": "jsonParsed"})], callback)
            .unwrap();
        assert_eq!(request_id, 1);
        assert_eq!(
            transport.last_sent(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "accountSubscribe", "params": [pubkey, {"encoding": "jsonParsed"}]})
        );
        assert_eq!(registry.state_of_request(1), SubscriptionState::Pending);

        let dispatch = registry.on_message(r#"{"jsonrpc":"2.0","result":23784,"id":1}"#).unwrap();
        assert_eq!(dispatch, Dispatch::Confirmed { request_id: 1, subscription_id: 23784 });
        assert_eq!(registry.state_of(23784), SubscriptionState::Active);
        assert_eq!(registry.subscription_id_for(1), Some(23784));

        let payload = json!({"context": {"slot": 5199307}, "value": {"lamports": 33594, "owner": "11111111111111111111111111111111"}});
        let dispatch = registry
            .on_message(&notification("accountNotification", 23784, payload.clone()))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Delivered { subscription_id: 23784, retired: false });
        assert_eq!(recv(&mut payloads).await, payload);

        // exactly once
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(payloads.try_recv().is_err());

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Confirmed { request_id: 1, subscription_id: 23784, topic: Topic::Account }
        );
    }

    #[tokio::test]
    async fn test_notification_before_confirmation_is_dropped() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (callback, mut payloads) = forwarding();

        let request_id = registry.subscribe(Topic::Slot, vec![], callback).unwrap();

        // The server id happens to equal the request id; the entry is still PENDING.
        let dispatch = registry
            .on_message(&notification("slotNotification", request_id, json!({"slot": 1})))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Dropped { subscription_id: request_id });

        registry.on_message(&confirmation(request_id, 77)).unwrap();
        registry
            .on_message(&notification("slotNotification", 77, json!({"slot": 2})))
            .unwrap();
        assert_eq!(recv(&mut payloads).await, json!({"slot": 2}));
        assert!(payloads.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_discards_subscription() {
        let transport = Arc::new(MockTransport::failing());
        let (registry, _events) = registry_with(transport);
        let (callback, _payloads) = forwarding();

        let result = registry.subscribe(Topic::Root, vec![], callback);
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id_leaves_table_unchanged() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport.clone());
        let (callback, _payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], callback).unwrap();
        registry.on_message(&confirmation(1, 10)).unwrap();
        let sent_before = transport.sent().len();

        assert!(matches!(registry.unsubscribe(999), Err(Error::UnknownSubscription(999))));
        assert_eq!(transport.sent().len(), sent_before);
        assert_eq!(registry.state_of(10), SubscriptionState::Active);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_pending_request_is_unknown() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (callback, _payloads) = forwarding();

        let request_id = registry.subscribe(Topic::Vote, vec![], callback).unwrap();
        assert!(matches!(registry.unsubscribe(request_id), Err(Error::UnknownSubscription(_))));
        assert_eq!(registry.state_of_request(request_id), SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn test_unsubscribe_lifecycle() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport.clone());
        let (callback, mut payloads) = forwarding();

        registry.subscribe(Topic::Program, vec![json!("11111111111111111111111111111111")], callback).unwrap();
        registry.on_message(&confirmation(1, 42)).unwrap();

        registry.unsubscribe(42).unwrap();
        assert_eq!(
            transport.last_sent(),
            json!({"jsonrpc": "2.0", "id": 2, "method": "programUnsubscribe", "params": [42]})
        );
        assert_eq!(registry.state_of(42), SubscriptionState::Cancelling);

        // A second unsubscribe while CANCELLING is rejected.
        assert!(matches!(registry.unsubscribe(42), Err(Error::UnknownSubscription(42))));

        // Notifications after the CANCELLING transition are not dispatched.
        let dispatch = registry
            .on_message(&notification("programNotification", 42, json!({"late": true})))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Dropped { subscription_id: 42 });

        let dispatch = registry.on_message(r#"{"jsonrpc":"2.0","result":true,"id":2}"#).unwrap();
        assert_eq!(dispatch, Dispatch::Unsubscribed { subscription_id: 42 });
        assert_eq!(registry.state_of(42), SubscriptionState::Closed);
        assert_eq!(registry.active_count(), 0);

        // Entry gone, so the callback task has finished without ever being invoked.
        let closed = tokio::time::timeout(Duration::from_secs(2), payloads.recv()).await.unwrap();
        assert!(closed.is_none());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ClientEvent::Unsubscribed { subscription_id: 42, topic: Topic::Program }));
    }

    #[tokio::test]
    async fn test_unsubscribe_send_failure_restores_active() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport.clone());
        let (callback, mut payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], callback).unwrap();
        registry.on_message(&confirmation(1, 5)).unwrap();

        transport.set_failing(true);
        assert!(matches!(registry.unsubscribe(5), Err(Error::Transport(_))));
        assert_eq!(registry.state_of(5), SubscriptionState::Active);

        registry.on_message(&notification("slotNotification", 5, json!(1))).unwrap();
        assert_eq!(recv(&mut payloads).await, json!(1));
    }

    #[tokio::test]
    async fn test_unsubscribe_topic_must_match() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (callback, _payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], callback).unwrap();
        registry.on_message(&confirmation(1, 9)).unwrap();

        assert!(matches!(registry.unsubscribe_topic(Topic::Root, 9), Err(Error::UnknownSubscription(9))));
        assert_eq!(registry.state_of(9), SubscriptionState::Active);
        registry.unsubscribe_topic(Topic::Slot, 9).unwrap();
        assert_eq!(registry.state_of(9), SubscriptionState::Cancelling);
    }

    #[tokio::test]
    async fn test_received_signature_keeps_subscription_until_status() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport);
        let (callback, mut payloads) = forwarding();

        registry
            .subscribe(Topic::Signature, vec![json!("sig"), json!({"enableReceivedNotification": true})], callback)
            .unwrap();
        registry.on_message(&confirmation(1, 5)).unwrap();

        let received = json!({"context": {"slot": 5207624}, "value": "receivedSignature"});
        let dispatch = registry
            .on_message(&notification("signatureNotification", 5, received.clone()))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Delivered { subscription_id: 5, retired: false });
        assert_eq!(registry.state_of(5), SubscriptionState::Active);

        let status = json!({"context": {"slot": 5207625}, "value": {"err": null}});
        let dispatch = registry
            .on_message(&notification("signatureNotification", 5, status.clone()))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Delivered { subscription_id: 5, retired: true });
        assert_eq!(registry.state_of(5), SubscriptionState::Closed);

        assert_eq!(recv(&mut payloads).await, received);
        assert_eq!(recv(&mut payloads).await, status);

        let mut retired = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::Retired { subscription_id: 5, .. }) {
                retired += 1;
            }
        }
        assert_eq!(retired, 1);
    }

    #[tokio::test]
    async fn test_signature_subscription_retires_after_one_notification() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport);
        let (callback, mut payloads) = forwarding();

        registry.subscribe(Topic::Signature, vec![json!("sig")], callback).unwrap();
        registry.on_message(&confirmation(1, 300)).unwrap();

        let payload = json!({"context": {"slot": 5207624}, "value": {"err": null}});
        let dispatch = registry
            .on_message(&notification("signatureNotification", 300, payload.clone()))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Delivered { subscription_id: 300, retired: true });
        assert_eq!(recv(&mut payloads).await, payload);

        assert_eq!(registry.state_of(300), SubscriptionState::Closed);
        assert!(matches!(registry.unsubscribe(300), Err(Error::UnknownSubscription(300))));

        // retiring again is a no-op
        assert!(!registry.retire(300));

        // a duplicate notification is dropped, not an error
        let dispatch = registry
            .on_message(&notification("signatureNotification", 300, json!({})))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Dropped { subscription_id: 300 });

        let mut retired = false;
        while let Ok(event) = events.try_recv() {
            retired |= event == ClientEvent::Retired { subscription_id: 300, topic: Topic::Signature };
        }
        assert!(retired);
    }

    #[tokio::test]
    async fn test_subscribe_error_reply_closes_pending_entry() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport);
        let (callback, _payloads) = forwarding();

        registry.subscribe(Topic::Block, vec![json!("all")], callback).unwrap();
        let dispatch = registry
            .on_message(r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":1}"#)
            .unwrap();
        assert_eq!(dispatch, Dispatch::Rejected { request_id: 1 });
        assert_eq!(registry.state_of_request(1), SubscriptionState::Closed);
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::SubscribeRejected {
                request_id: 1,
                topic: Topic::Block,
                code: -32601,
                message: "Method not found".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_stop_dispatch() {
        let transport = Arc::new(MockTransport::default());
        let (registry, mut events) = registry_with(transport);
        let (callback, mut payloads) = forwarding();

        registry.subscribe(Topic::Root, vec![], callback).unwrap();
        registry.on_message(&confirmation(1, 8)).unwrap();

        let result = registry.on_message(r#"{"jsonrpc":"2.0","method":"rootNotification","params":{"result":1}}"#);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(matches!(registry.on_message("garbage"), Err(Error::Protocol(_))));

        registry.on_message(&notification("rootNotification", 8, json!(42))).unwrap();
        assert_eq!(recv(&mut payloads).await, json!(42));

        let mut protocol_errors = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::ProtocolError { .. }) {
                protocol_errors += 1;
            }
        }
        assert_eq!(protocol_errors, 2);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_id_is_rejected() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (first, mut first_payloads) = forwarding();
        let (second, _second_payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], first).unwrap();
        registry.subscribe(Topic::Root, vec![], second).unwrap();
        registry.on_message(&confirmation(1, 55)).unwrap();

        assert!(matches!(registry.on_message(&confirmation(2, 55)), Err(Error::Protocol(_))));
        assert_eq!(registry.topic_of(55), Some(Topic::Slot));
        assert_eq!(registry.state_of_request(2), SubscriptionState::Closed);

        registry.on_message(&notification("slotNotification", 55, json!(3))).unwrap();
        assert_eq!(recv(&mut first_payloads).await, json!(3));
    }

    #[tokio::test]
    async fn test_untracked_response_is_ignored() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        assert_eq!(
            registry.on_message(&confirmation(1234, 1)).unwrap(),
            Dispatch::Ignored { request_id: 1234 }
        );
    }

    #[tokio::test]
    async fn test_notifications_keep_delivery_order() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (callback, mut payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], callback).unwrap();
        registry.on_message(&confirmation(1, 3)).unwrap();
        for slot in 0..100u64 {
            registry
                .on_message(&notification("slotNotification", 3, json!({"slot": slot})))
                .unwrap();
        }
        for slot in 0..100u64 {
            assert_eq!(recv(&mut payloads).await, json!({"slot": slot}));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_callback_does_not_block_other_subscriptions() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);

        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let slow: Callback = Box::new(move |_| {
            // Blocks until the test opens the gate.
            let _ = gate_rx.recv();
        });
        let (fast, mut fast_payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], slow).unwrap();
        registry.subscribe(Topic::Root, vec![], fast).unwrap();
        registry.on_message(&confirmation(1, 100)).unwrap();
        registry.on_message(&confirmation(2, 200)).unwrap();

        registry.on_message(&notification("slotNotification", 100, json!(1))).unwrap();
        registry.on_message(&notification("rootNotification", 200, json!(2))).unwrap();

        assert_eq!(recv(&mut fast_payloads).await, json!(2));
        gate_tx.send(()).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_confirm_unsubscribe() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport.clone());
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    let id = registry.subscribe(Topic::Slot, vec![], Box::new(|_: Value| {})).unwrap();
                    ids.push(id);
                }
                ids
            }));
        }
        let mut request_ids = Vec::new();
        for handle in handles {
            request_ids.extend(handle.await.unwrap());
        }
        assert_eq!(registry.pending_count(), 200);

        // Confirm from several tasks at once; subscription id = request id + 1000.
        let mut confirmers = Vec::new();
        for chunk in request_ids.chunks(50) {
            let registry = registry.clone();
            let chunk = chunk.to_vec();
            confirmers.push(tokio::spawn(async move {
                for request_id in chunk {
                    registry.on_message(&confirmation(request_id, request_id + 1000)).unwrap();
                    registry
                        .on_message(&notification("slotNotification", request_id + 1000, json!(request_id)))
                        .unwrap();
                    registry.unsubscribe(request_id + 1000).unwrap();
                }
            }));
        }
        for confirmer in confirmers {
            confirmer.await.unwrap();
        }

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.active_count(), 200);
        for request_id in &request_ids {
            assert_eq!(registry.state_of(request_id + 1000), SubscriptionState::Cancelling);
        }

        // Every unsubscribe went out with its own request id.
        let unsubscribes: Vec<Value> = transport
            .sent()
            .into_iter()
            .filter(|m| m["method"] == "slotUnsubscribe")
            .collect();
        assert_eq!(unsubscribes.len(), 200);
        for message in unsubscribes {
            let ack = json!({"jsonrpc": "2.0", "result": true, "id": message["id"]}).to_string();
            assert!(matches!(registry.on_message(&ack).unwrap(), Dispatch::Unsubscribed { .. }));
        }
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_clears_table_and_is_repeatable() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport);
        let (first, mut first_payloads) = forwarding();
        let (second, _second_payloads) = forwarding();

        registry.subscribe(Topic::Slot, vec![], first).unwrap();
        registry.subscribe(Topic::Root, vec![], second).unwrap();
        registry.on_message(&confirmation(1, 1)).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.close_all(), 0);
        assert_eq!(registry.state_of(1), SubscriptionState::Closed);
        let closed = tokio::time::timeout(Duration::from_secs(2), first_payloads.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[test]
    fn test_subscribe_outside_runtime_fails_cleanly() {
        let transport = Arc::new(MockTransport::default());
        let (registry, _events) = registry_with(transport.clone());
        let result = registry.subscribe(Topic::Slot, vec![], Box::new(|_: Value| {}));
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(transport.sent().is_empty());
    }
}
