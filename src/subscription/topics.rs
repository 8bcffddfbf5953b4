/// Subscription topics and their parameter shaping.
///
/// Every optional field is omitted from the outbound params when absent; a
/// config object left with no fields is not sent at all.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::rpc::params::{non_blank, push_config};
use crate::types::{validate_pubkey, validate_signature, Commitment, Encoding, TransactionDetails};

/// Method family of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Account,
    Block,
    Logs,
    Program,
    Signature,
    Slot,
    SlotsUpdates,
    Root,
    Vote,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::Account,
        Topic::Block,
        Topic::Logs,
        Topic::Program,
        Topic::Signature,
        Topic::Slot,
        Topic::SlotsUpdates,
        Topic::Root,
        Topic::Vote,
    ];

    pub fn subscribe_method(&self) -> &'static str {
        match self {
            Topic::Account => "accountSubscribe",
            Topic::Block => "blockSubscribe",
            Topic::Logs => "logsSubscribe",
            Topic::Program => "programSubscribe",
            Topic::Signature => "signatureSubscribe",
            Topic::Slot => "slotSubscribe",
            Topic::SlotsUpdates => "slotsUpdatesSubscribe",
            Topic::Root => "rootSubscribe",
            Topic::Vote => "voteSubscribe",
        }
    }

    pub fn unsubscribe_method(&self) -> &'static str {
        match self {
            Topic::Account => "accountUnsubscribe",
            Topic::Block => "blockUnsubscribe",
            Topic::Logs => "logsUnsubscribe",
            Topic::Program => "programUnsubscribe",
            Topic::Signature => "signatureUnsubscribe",
            Topic::Slot => "slotUnsubscribe",
            Topic::SlotsUpdates => "slotsUpdatesUnsubscribe",
            Topic::Root => "rootUnsubscribe",
            Topic::Vote => "voteUnsubscribe",
        }
    }

    pub fn notification_method(&self) -> &'static str {
        match self {
            Topic::Account => "accountNotification",
            Topic::Block => "blockNotification",
            Topic::Logs => "logsNotification",
            Topic::Program => "programNotification",
            Topic::Signature => "signatureNotification",
            Topic::Slot => "slotNotification",
            Topic::SlotsUpdates => "slotsUpdatesNotification",
            Topic::Root => "rootNotification",
            Topic::Vote => "voteNotification",
        }
    }

    /// The server cancels these after their final notification
    pub fn is_single_shot(&self) -> bool {
        matches!(self, Topic::Signature)
    }

    /// Whether `result` is the last notification a single-shot subscription gets.
    ///
    /// With `enableReceivedNotification` the node first reports
    /// `"receivedSignature"` and keeps the subscription open for the status.
    pub fn is_final_notification(&self, result: &Value) -> bool {
        self.is_single_shot() && result.get("value").and_then(Value::as_str) != Some(RECEIVED_SIGNATURE)
    }
}

const RECEIVED_SIGNATURE: &str = "receivedSignature";

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.subscribe_method().trim_end_matches("Subscribe");
        f.write_str(prefix)
    }
}

/// Connection-level fallbacks for commitment and encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicDefaults {
    pub commitment: Option<Commitment>,
    pub encoding: Option<Encoding>,
}

impl From<&Settings> for TopicDefaults {
    fn from(settings: &Settings) -> Self {
        Self {
            commitment: settings.commitment,
            encoding: settings.encoding,
        }
    }
}

impl TopicDefaults {
    fn commitment(&self, explicit: Option<Commitment>) -> Option<Commitment> {
        explicit.or(self.commitment)
    }

    /// An explicit encoding must be valid for the topic; a default that is not is skipped.
    fn encoding(&self, explicit: Option<Encoding>, allowed: &[Encoding]) -> Result<Option<Encoding>> {
        match explicit {
            Some(encoding) if allowed.contains(&encoding) => Ok(Some(encoding)),
            Some(encoding) => Err(Error::invalid(
                "encoding",
                format!("{:?} is not supported for this subscription", encoding),
            )),
            None => Ok(self.encoding.filter(|e| allowed.contains(e))),
        }
    }
}

const ACCOUNT_ENCODINGS: [Encoding; 4] = [
    Encoding::Base58,
    Encoding::Base64,
    Encoding::Base64Zstd,
    Encoding::JsonParsed,
];

const BLOCK_ENCODINGS: [Encoding; 4] = [Encoding::Json, Encoding::JsonParsed, Encoding::Base58, Encoding::Base64];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountSubscribeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
}

pub fn account_params(pubkey: &str, config: &AccountSubscribeConfig, defaults: &TopicDefaults) -> Result<Vec<Value>> {
    validate_pubkey("pubkey", pubkey)?;
    let mut params = vec![json!(pubkey)];
    push_config(
        &mut params,
        &AccountSubscribeConfig {
            commitment: defaults.commitment(config.commitment),
            encoding: defaults.encoding(config.encoding, &ACCOUNT_ENCODINGS)?,
        },
    )?;
    Ok(params)
}

/// Which blocks to be notified about
#[derive(Debug, Clone, PartialEq)]
pub enum BlockFilter {
    All,
    MentionsAccountOrProgram(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSubscribeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_details: Option<TransactionDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_rewards: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_supported_transaction_version: Option<u8>,
}

pub fn block_params(filter: &BlockFilter, config: &BlockSubscribeConfig, defaults: &TopicDefaults) -> Result<Vec<Value>> {
    let filter = match filter {
        BlockFilter::All => json!("all"),
        BlockFilter::MentionsAccountOrProgram(key) => {
            validate_pubkey("mentionsAccountOrProgram", key)?;
            json!({ "mentionsAccountOrProgram": key })
        }
    };
    let mut params = vec![filter];
    push_config(
        &mut params,
        &BlockSubscribeConfig {
            commitment: defaults.commitment(config.commitment),
            encoding: defaults.encoding(config.encoding, &BLOCK_ENCODINGS)?,
            ..config.clone()
        },
    )?;
    Ok(params)
}

/// Which transactions' logs to be notified about
#[derive(Debug, Clone, PartialEq)]
pub enum LogsFilter {
    /// All transactions except simple vote transactions
    All,
    AllWithVotes,
    Mentions(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogsSubscribeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
}

pub fn logs_params(filter: &LogsFilter, config: &LogsSubscribeConfig, defaults: &TopicDefaults) -> Result<Vec<Value>> {
    let filter = match filter {
        LogsFilter::All => json!("all"),
        LogsFilter::AllWithVotes => json!("allWithVotes"),
        LogsFilter::Mentions(keys) => {
            if keys.is_empty() {
                return Err(Error::invalid("mentions", "at least one address is required"));
            }
            for key in keys {
                validate_pubkey("mentions", key)?;
            }
            json!({ "mentions": keys })
        }
    };
    let mut params = vec![filter];
    push_config(
        &mut params,
        &LogsSubscribeConfig {
            commitment: defaults.commitment(config.commitment),
        },
    )?;
    Ok(params)
}

/// Server-side filter for program account notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgramFilter {
    DataSize(u64),
    Memcmp(Memcmp),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memcmp {
    pub offset: usize,
    /// Base58 unless `encoding` says otherwise
    pub bytes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgramSubscribeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<ProgramFilter>,
}

pub fn program_params(program_id: &str, config: &ProgramSubscribeConfig, defaults: &TopicDefaults) -> Result<Vec<Value>> {
    validate_pubkey("program_id", program_id)?;
    let mut filters = Vec::with_capacity(config.filters.len());
    for filter in &config.filters {
        filters.push(match filter {
            ProgramFilter::Memcmp(memcmp) => {
                let bytes = non_blank(Some(memcmp.bytes.as_str()))
                    .ok_or_else(|| Error::invalid("filters", "memcmp bytes must not be blank"))?;
                ProgramFilter::Memcmp(Memcmp {
                    offset: memcmp.offset,
                    bytes,
                    encoding: non_blank(memcmp.encoding.as_deref()),
                })
            }
            other => other.clone(),
        });
    }

    let mut params = vec![json!(program_id)];
    push_config(
        &mut params,
        &ProgramSubscribeConfig {
            commitment: defaults.commitment(config.commitment),
            encoding: defaults.encoding(config.encoding, &ACCOUNT_ENCODINGS)?,
            filters,
        },
    )?;
    Ok(params)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSubscribeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<Commitment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_received_notification: Option<bool>,
}

pub fn signature_params(signature: &str, config: &SignatureSubscribeConfig, defaults: &TopicDefaults) -> Result<Vec<Value>> {
    validate_signature("signature", signature)?;
    let mut params = vec![json!(signature)];
    push_config(
        &mut params,
        &SignatureSubscribeConfig {
            commitment: defaults.commitment(config.commitment),
            enable_received_notification: config.enable_received_notification,
        },
    )?;
    Ok(params)
}
