/// Subscription management: topic parameter shaping, the registry/dispatcher and lifecycle events

pub mod events;
pub mod registry;
pub mod topics;

pub use events::ClientEvent;
pub use registry::{Callback, Dispatch, SubscriptionRegistry, SubscriptionState};
pub use topics::{
    AccountSubscribeConfig, BlockFilter, BlockSubscribeConfig, LogsFilter, LogsSubscribeConfig, Memcmp,
    ProgramFilter, ProgramSubscribeConfig, SignatureSubscribeConfig, Topic, TopicDefaults,
};
