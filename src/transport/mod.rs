/// Connection transports carrying serialized JSON-RPC envelopes

pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::{ConnectionState, ConnectionStats, WsTransport};

use crate::error::Result;

/// Outbound half of a persistent duplex connection.
///
/// Inbound frames are delivered separately (see [`WsTransport::connect`]), so
/// implementations only need to queue text frames and shut down.
pub trait Transport: Send + Sync {
    /// Queues one text frame. Fails with `Error::Transport` once the connection is gone.
    fn send(&self, text: String) -> Result<()>;

    /// Starts a graceful close. Idempotent.
    fn close(&self);
}
