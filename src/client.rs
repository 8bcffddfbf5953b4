/// WebSocket PubSub client: one connection, one subscription table

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::{ClientConfig, Settings};
use crate::error::Result;
use crate::rpc::RequestBuilder;
use crate::subscription::topics::{self, TopicDefaults};
use crate::subscription::{
    AccountSubscribeConfig, BlockFilter, BlockSubscribeConfig, ClientEvent, LogsFilter, LogsSubscribeConfig,
    ProgramSubscribeConfig, SignatureSubscribeConfig, SubscriptionRegistry, SubscriptionState, Topic,
};
use crate::transport::{ConnectionStats, Transport, WsTransport};

/// Owns the WebSocket connection and its subscription registry.
///
/// Every `*_subscribe` method returns the client request id immediately; the
/// server-assigned subscription id becomes available once the confirmation
/// arrives (see [`ClientEvent::Confirmed`] and [`PubSubClient::subscription_id_for`]).
/// A subscription that is never confirmed simply stays pending.
pub struct PubSubClient {
    settings: Settings,
    defaults: TopicDefaults,
    transport: Arc<WsTransport>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: JoinHandle<()>,
}

impl std::fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubClient")
            .field("cluster", &self.settings.cluster.name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PubSubClient {
    /// Resolves `config` against the global defaults and connects
    pub async fn connect(config: ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let settings = config.resolve()?;
        Self::connect_with(settings).await
    }

    #[instrument(skip(settings), fields(cluster = %settings.cluster))]
    pub async fn connect_with(settings: Settings) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let (transport, mut inbound) = WsTransport::connect(&settings).await?;
        let transport = Arc::new(transport);

        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriptionRegistry::new(
            transport.clone(),
            Arc::new(RequestBuilder::new()),
            Some(event_sender),
        ));

        // Reader side: one message at a time, so per-subscription order is the arrival order.
        let dispatcher = {
            let registry = registry.clone();
            tokio::spawn(async move {
                while let Some(text) = inbound.recv().await {
                    // Errors are reported by the registry; keep going.
                    let _ = registry.on_message(&text);
                }
                let closed_subscriptions = registry.close_all();
                info!(closed_subscriptions, "Connection ended, subscriptions closed");
                registry.emit(ClientEvent::Disconnected { closed_subscriptions });
            })
        };

        let client = Self {
            defaults: TopicDefaults::from(&settings),
            settings,
            transport,
            registry,
            dispatcher,
        };
        Ok((client, event_receiver))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Generic subscribe for callers that shape their own params
    pub fn subscribe(&self, topic: Topic, params: Vec<Value>, callback: impl FnMut(Value) + Send + 'static) -> Result<u64> {
        self.registry.subscribe(topic, params, Box::new(callback))
    }

    /// Generic unsubscribe by server-assigned id, whatever the topic
    pub fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe(subscription_id)
    }

    pub fn account_subscribe(
        &self,
        pubkey: &str,
        config: &AccountSubscribeConfig,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<u64> {
        let params = topics::account_params(pubkey, config, &self.defaults)?;
        self.subscribe(Topic::Account, params, callback)
    }

    pub fn account_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Account, subscription_id)
    }

    pub fn block_subscribe(
        &self,
        filter: &BlockFilter,
        config: &BlockSubscribeConfig,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<u64> {
        let params = topics::block_params(filter, config, &self.defaults)?;
        self.subscribe(Topic::Block, params, callback)
    }

    pub fn block_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Block, subscription_id)
    }

    pub fn logs_subscribe(
        &self,
        filter: &LogsFilter,
        config: &LogsSubscribeConfig,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<u64> {
        let params = topics::logs_params(filter, config, &self.defaults)?;
        self.subscribe(Topic::Logs, params, callback)
    }

    pub fn logs_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Logs, subscription_id)
    }

    pub fn program_subscribe(
        &self,
        program_id: &str,
        config: &ProgramSubscribeConfig,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<u64> {
        let params = topics::program_params(program_id, config, &self.defaults)?;
        self.subscribe(Topic::Program, params, callback)
    }

    pub fn program_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Program, subscription_id)
    }

    /// Single-shot: the subscription is retired after its one notification.
    pub fn signature_subscribe(
        &self,
        signature: &str,
        config: &SignatureSubscribeConfig,
        callback: impl FnMut(Value) + Send + 'static,
    ) -> Result<u64> {
        let params = topics::signature_params(signature, config, &self.defaults)?;
        self.subscribe(Topic::Signature, params, callback)
    }

    pub fn signature_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Signature, subscription_id)
    }

    pub fn slot_subscribe(&self, callback: impl FnMut(Value) + Send + 'static) -> Result<u64> {
        self.subscribe(Topic::Slot, Vec::new(), callback)
    }

    pub fn slot_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Slot, subscription_id)
    }

    pub fn slots_updates_subscribe(&self, callback: impl FnMut(Value) + Send + 'static) -> Result<u64> {
        self.subscribe(Topic::SlotsUpdates, Vec::new(), callback)
    }

    pub fn slots_updates_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::SlotsUpdates, subscription_id)
    }

    pub fn root_subscribe(&self, callback: impl FnMut(Value) + Send + 'static) -> Result<u64> {
        self.subscribe(Topic::Root, Vec::new(), callback)
    }

    pub fn root_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Root, subscription_id)
    }

    pub fn vote_subscribe(&self, callback: impl FnMut(Value) + Send + 'static) -> Result<u64> {
        self.subscribe(Topic::Vote, Vec::new(), callback)
    }

    pub fn vote_unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.registry.unsubscribe_topic(Topic::Vote, subscription_id)
    }

    pub fn subscription_id_for(&self, request_id: u64) -> Option<u64> {
        self.registry.subscription_id_for(request_id)
    }

    pub fn state_of(&self, subscription_id: u64) -> SubscriptionState {
        self.registry.state_of(subscription_id)
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.transport.stats().await
    }

    /// Closes the connection and waits for the dispatcher to clear the table
    #[instrument(skip(self))]
    pub async fn close(mut self) {
        self.transport.close();
        match tokio::time::timeout(self.settings.connect_timeout, &mut self.dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Dispatcher task ended abnormally"),
            Err(_) => {
                debug!("Server did not answer the close frame in time");
                self.dispatcher.abort();
            }
        }
        self.registry.close_all();
    }
}

impl Drop for PubSubClient {
    fn drop(&mut self) {
        // Both calls are no-ops after `close`.
        self.transport.close();
        self.dispatcher.abort();
    }
}
