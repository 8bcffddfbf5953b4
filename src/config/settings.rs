/// Client configuration: process-wide defaults and per-instance overrides

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

use super::Cluster;
use crate::error::{Error, Result};
use crate::types::{Commitment, Encoding};

/// Process-wide defaults, consulted only for fields a `ClientConfig` leaves unset
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub cluster: String,
    pub commitment: Option<Commitment>,
    pub encoding: Option<Encoding>,
    /// Heartbeat ping interval; 0 disables pings
    pub ping_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            cluster: "mainnet-beta".to_string(),
            commitment: None,
            encoding: None,
            ping_interval_secs: 30,
            connect_timeout_ms: 30000,
            request_timeout_ms: 30000,
        }
    }
}

static GLOBAL_DEFAULTS: RwLock<Option<Defaults>> = RwLock::new(None);

/// Installs the process-wide defaults. Later calls replace earlier ones.
pub fn init_defaults(defaults: Defaults) {
    info!(cluster = %defaults.cluster, "Installing global client defaults");
    let mut slot = GLOBAL_DEFAULTS.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(defaults);
}

/// Current process-wide defaults, or the built-in ones if none were installed
pub fn defaults() -> Defaults {
    let slot = GLOBAL_DEFAULTS.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.clone().unwrap_or_default()
}

/// Drops installed defaults, falling back to the built-in ones
pub fn reset_defaults() {
    let mut slot = GLOBAL_DEFAULTS.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}

/// Per-instance configuration. Every field is optional; unset fields fall back
/// to the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cluster name (`mainnet-beta`, `devnet`, `testnet`, `localnet`) or URL
    pub cluster: Option<String>,
    pub commitment: Option<Commitment>,
    pub encoding: Option<Encoding>,
    /// Extra headers sent with the WebSocket handshake and HTTP requests
    pub headers: BTreeMap<String, String>,
    pub ping_interval_secs: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

/// Fully resolved settings handed to the transport and the method surface
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cluster: Cluster,
    pub commitment: Option<Commitment>,
    pub encoding: Option<Encoding>,
    pub headers: BTreeMap<String, String>,
    pub ping_interval: Option<Duration>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn for_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: Some(cluster.into()),
            ..Default::default()
        }
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path, e)))?;
        let config = toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("cannot parse {}: {}", path, e)))?;
        debug!(path = %path, "Loaded client configuration");
        Ok(config)
    }

    /// Resolves against the current global defaults.
    pub fn resolve(&self) -> Result<Settings> {
        self.resolve_with(&defaults())
    }

    /// Resolves against explicit defaults. Instance values always win.
    pub fn resolve_with(&self, defaults: &Defaults) -> Result<Settings> {
        let cluster_name = self
            .cluster
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&defaults.cluster);
        let cluster: Cluster = cluster_name.parse()?;

        let ping_secs = self.ping_interval_secs.unwrap_or(defaults.ping_interval_secs);
        let connect_ms = self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms);
        if connect_ms == 0 {
            return Err(Error::Configuration("connect timeout must be positive".to_string()));
        }
        let request_ms = self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms);
        if request_ms == 0 {
            return Err(Error::Configuration("request timeout must be positive".to_string()));
        }

        Ok(Settings {
            cluster,
            commitment: self.commitment.or(defaults.commitment),
            encoding: self.encoding.or(defaults.encoding),
            headers: self.headers.clone(),
            ping_interval: (ping_secs > 0).then(|| Duration::from_secs(ping_secs)),
            connect_timeout: Duration::from_millis(connect_ms),
            request_timeout: Duration::from_millis(request_ms),
        })
    }
}
