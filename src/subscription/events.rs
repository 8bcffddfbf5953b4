use super::topics::Topic;

/// Subscription lifecycle events published to the client's event receiver
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server bound a subscription id to one of our subscribe requests
    Confirmed {
        request_id: u64,
        subscription_id: u64,
        topic: Topic,
    },
    /// The server answered a subscribe request with an error
    SubscribeRejected {
        request_id: u64,
        topic: Topic,
        code: i64,
        message: String,
    },
    /// An unsubscribe was acknowledged and the entry removed
    Unsubscribed { subscription_id: u64, topic: Topic },
    /// A single-shot subscription delivered its notification and was retired
    Retired { subscription_id: u64, topic: Topic },
    /// An inbound message could not be handled
    ProtocolError { error: String },
    /// The connection is gone; every subscription was closed
    Disconnected { closed_subscriptions: usize },
}
