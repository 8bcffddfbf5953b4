/// Protocol-level value types shared by the config layer and the topic methods

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Commitment level attached to most subscribe and request calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

impl FromStr for Commitment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(Error::invalid("commitment", format!("unknown level '{}'", other))),
        }
    }
}

/// Account data encoding requested from the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "base58")]
    Base58,
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "base64+zstd")]
    Base64Zstd,
    #[serde(rename = "jsonParsed")]
    JsonParsed,
    /// Only meaningful for block subscriptions
    #[serde(rename = "json")]
    Json,
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base58" => Ok(Encoding::Base58),
            "base64" => Ok(Encoding::Base64),
            "base64+zstd" => Ok(Encoding::Base64Zstd),
            "jsonParsed" => Ok(Encoding::JsonParsed),
            "json" => Ok(Encoding::Json),
            other => Err(Error::invalid("encoding", format!("unknown encoding '{}'", other))),
        }
    }
}

/// Level of transaction detail included in block notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDetails {
    Full,
    Signatures,
    Accounts,
    None,
}

/// Validates a base58 encoded public key (32 bytes)
pub fn validate_pubkey(name: &'static str, value: &str) -> crate::Result<()> {
    validate_base58(name, value, 32)
}

/// Validates a base58 encoded transaction signature (64 bytes)
pub fn validate_signature(name: &'static str, value: &str) -> crate::Result<()> {
    validate_base58(name, value, 64)
}

fn validate_base58(name: &'static str, value: &str, expected_len: usize) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(name, "must not be blank"));
    }
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|e| Error::invalid(name, e.to_string()))?;
    if bytes.len() != expected_len {
        return Err(Error::invalid(
            name,
            format!("expected {} bytes, decoded {}", expected_len, bytes.len()),
        ));
    }
    Ok(())
}
