/// Error types shared by the HTTP client, the transport and the subscription registry

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or invalid cluster endpoint, unreadable config file.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request could not be handed to the connection, or the connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound message could not be parsed or classified.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
