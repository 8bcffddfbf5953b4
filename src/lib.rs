// Solana JSON-RPC client: HTTP requests and WebSocket subscriptions

pub mod client;
pub mod config;
pub mod error;
pub mod rpc;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-export commonly used types for convenience
pub use client::PubSubClient;
pub use config::{ClientConfig, Cluster, Defaults, Settings};
pub use error::{Error, Result};
pub use rpc::HttpClient;
pub use subscription::{ClientEvent, SubscriptionRegistry, SubscriptionState, Topic};
pub use types::{Commitment, Encoding, TransactionDetails};
