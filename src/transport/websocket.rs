use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, instrument, warn};

use super::Transport;
use crate::config::Settings;
use crate::error::{Error, Result};

/// Connection state for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Closing,
    Closed,
    Failed,
}

/// Statistics for monitoring WebSocket traffic
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub url: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub pings_sent: u64,
    pub connected_at: Instant,
    pub last_message_time: Option<Instant>,
}

/// WebSocket connection to a cluster's PubSub endpoint.
///
/// Outbound frames go through an unbounded channel drained by a writer task;
/// inbound text frames are forwarded, in arrival order, to the receiver
/// returned by [`WsTransport::connect`]. That receiver yields `None` once the
/// connection is gone.
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    stats: Arc<RwLock<ConnectionStats>>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Opens the connection and starts the writer, reader and heartbeat tasks.
    #[instrument(skip(settings), fields(url = %settings.cluster.ws_url))]
    pub async fn connect(settings: &Settings) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        let url = settings.cluster.ws_url.to_string();
        info!("Connecting to PubSub endpoint {}", url);

        let mut request = url.as_str().into_client_request()?;
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Configuration(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Configuration(format!("invalid header value for '{}': {}", name, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, response) = timeout(settings.connect_timeout, connect_async(request))
            .await
            .map_err(|_| Error::Transport(format!("connection to {} timed out", url)))??;
        info!("Successfully connected to {} (HTTP {})", url, response.status());

        let stats = Arc::new(RwLock::new(ConnectionStats {
            state: ConnectionState::Connected,
            url: url.clone(),
            messages_sent: 0,
            messages_received: 0,
            pings_sent: 0,
            connected_at: Instant::now(),
            last_message_time: None,
        }));
        let closed = Arc::new(AtomicBool::new(false));

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        // Writer: drains the outbound queue; a Close frame ends it.
        {
            let stats = stats.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let is_close = matches!(msg, Message::Close(_));
                    let is_ping = matches!(msg, Message::Ping(_));
                    if let Err(e) = ws_sender.send(msg).await {
                        error!(error = %e, "Failed to send WebSocket message");
                        stats.write().await.state = ConnectionState::Failed;
                        break;
                    }
                    {
                        let mut stats = stats.write().await;
                        if is_ping {
                            stats.pings_sent += 1;
                        } else if !is_close {
                            stats.messages_sent += 1;
                        }
                    }
                    if is_close {
                        debug!("Close frame sent");
                        break;
                    }
                }
                closed.store(true, Ordering::SeqCst);
                debug!("WebSocket writer task ended");
            });
        }

        // Reader: forwards text frames; dropping inbound_tx signals the end of the stream.
        {
            let stats = stats.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            {
                                let mut stats = stats.write().await;
                                stats.messages_received += 1;
                                stats.last_message_time = Some(Instant::now());
                            }
                            if inbound_tx.send(text).is_err() {
                                debug!("Inbound receiver dropped, stopping reader");
                                break;
                            }
                        }
                        Ok(Message::Close(close_frame)) => {
                            info!("WebSocket closed: {:?}", close_frame);
                            break;
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                            // tungstenite answers pings itself
                        }
                        Ok(Message::Binary(data)) => {
                            warn!("Received unexpected binary message: {} bytes", data.len());
                        }
                        Ok(Message::Frame(_)) => {
                            debug!("Received raw frame message (ignored)");
                        }
                        Err(e) => {
                            error!(error = %e, "WebSocket receive error");
                            stats.write().await.state = ConnectionState::Failed;
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                let mut stats = stats.write().await;
                if stats.state != ConnectionState::Failed {
                    stats.state = ConnectionState::Closed;
                }
                debug!("WebSocket receive loop ended");
            });
        }

        // Heartbeat: ends once the writer has dropped its receiver.
        if let Some(period) = settings.ping_interval {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if tx.send(Message::Ping(Vec::new())).is_err() {
                        debug!("Heartbeat channel closed");
                        break;
                    }
                }
            });
        }

        let transport = Self {
            outbound: tx,
            closed,
            stats,
        };
        Ok((transport, inbound_rx))
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.stats.read().await.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.stats.read().await.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("WebSocket connection is closed".to_string()));
        }
        debug!("Sending WebSocket request: {}", text);
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| Error::Transport("WebSocket sender channel closed".to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing WebSocket connection");
        if let Ok(mut stats) = self.stats.try_write() {
            stats.state = ConnectionState::Closing;
        }
        // Bypasses the closed flag on purpose: the writer still has to flush this frame.
        let _ = self.outbound.send(Message::Close(None));
    }
}
