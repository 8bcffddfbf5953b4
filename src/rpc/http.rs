/// Request/response JSON-RPC client over HTTP

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::envelope::{JsonRpcResponse, RequestBuilder};
use super::params::push_config;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::{validate_pubkey, validate_signature, Commitment, Encoding};

/// Slot context attached to most account-level responses
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcContext {
    pub slot: u64,
}

/// `{context, value}` wrapper returned by context-bearing methods
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcResponse<T> {
    pub context: RpcContext,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeVersion {
    pub solana_core: String,
    #[serde(default)]
    pub feature_set: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
struct CommitmentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    commitment: Option<Commitment>,
}

#[derive(Debug, Default, Serialize)]
struct AccountInfoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    commitment: Option<Commitment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<Encoding>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatusConfig {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    search_transaction_history: bool,
}

/// HTTP JSON-RPC client for one cluster
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    settings: Settings,
    builder: Arc<RequestBuilder>,
}

impl HttpClient {
    pub fn new(settings: Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Configuration(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Configuration(format!("invalid header value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            builder: Arc::new(RequestBuilder::new()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Sends one request and returns the raw `result` value
    #[instrument(skip(self, params), fields(url = %self.settings.cluster.http_url))]
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = self.builder.build(method, params);
        debug!(id = request.id, method = %method, "Sending HTTP JSON-RPC request");

        let resp = self
            .client
            .post(self.settings.cluster.http_url.clone())
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            // Nodes report JSON-RPC errors with non-2xx codes too; prefer the body.
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&text) {
                if let Some(error) = response.error {
                    return Err(error.into());
                }
            }
            warn!(status = status.as_u16(), "HTTP JSON-RPC request failed");
            return Err(Error::Transport(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let response: JsonRpcResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("malformed response to {}: {}", method, e)))?;
        if response.id.is_some_and(|id| id != request.id) {
            return Err(Error::Protocol(format!(
                "response id {:?} does not match request id {}",
                response.id, request.id
            )));
        }
        response.into_outcome().map_err(Error::from)
    }

    /// Like [`HttpClient::call`] but deserializes the result
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn commitment_params(&self, commitment: Option<Commitment>) -> Result<Vec<Value>> {
        let mut params = Vec::new();
        push_config(
            &mut params,
            &CommitmentConfig {
                commitment: commitment.or(self.settings.commitment),
            },
        )?;
        Ok(params)
    }

    pub async fn get_slot(&self, commitment: Option<Commitment>) -> Result<u64> {
        let params = self.commitment_params(commitment)?;
        self.request("getSlot", params).await
    }

    pub async fn get_block_height(&self, commitment: Option<Commitment>) -> Result<u64> {
        let params = self.commitment_params(commitment)?;
        self.request("getBlockHeight", params).await
    }

    pub async fn get_balance(&self, pubkey: &str, commitment: Option<Commitment>) -> Result<RpcResponse<u64>> {
        validate_pubkey("pubkey", pubkey)?;
        let mut params = vec![json!(pubkey)];
        params.extend(self.commitment_params(commitment)?);
        self.request("getBalance", params).await
    }

    /// `value` is null when the account does not exist
    pub async fn get_account_info(
        &self,
        pubkey: &str,
        commitment: Option<Commitment>,
        encoding: Option<Encoding>,
    ) -> Result<RpcResponse<Value>> {
        validate_pubkey("pubkey", pubkey)?;
        let mut params = vec![json!(pubkey)];
        push_config(
            &mut params,
            &AccountInfoConfig {
                commitment: commitment.or(self.settings.commitment),
                encoding: encoding.or(self.settings.encoding),
            },
        )?;
        self.request("getAccountInfo", params).await
    }

    pub async fn get_latest_blockhash(&self, commitment: Option<Commitment>) -> Result<RpcResponse<LatestBlockhash>> {
        let params = self.commitment_params(commitment)?;
        self.request("getLatestBlockhash", params).await
    }

    pub async fn get_signature_statuses(
        &self,
        signatures: &[&str],
        search_transaction_history: bool,
    ) -> Result<RpcResponse<Vec<Option<Value>>>> {
        if signatures.is_empty() {
            return Err(Error::invalid("signatures", "at least one signature is required"));
        }
        for signature in signatures {
            validate_signature("signatures", signature)?;
        }
        let mut params = vec![json!(signatures)];
        push_config(
            &mut params,
            &SignatureStatusConfig {
                search_transaction_history,
            },
        )?;
        self.request("getSignatureStatuses", params).await
    }

    pub async fn get_version(&self) -> Result<NodeVersion> {
        self.request("getVersion", vec![]).await
    }

    /// Returns `Ok(())` when the node reports "ok"; an unhealthy node answers with an RPC error
    pub async fn get_health(&self) -> Result<()> {
        let status: String = self.request("getHealth", vec![]).await?;
        if status == "ok" {
            Ok(())
        } else {
            Err(Error::Protocol(format!("unexpected health status '{}'", status)))
        }
    }
}
