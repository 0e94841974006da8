//! Output Sinks
//!
//! Formats decoded and failed router calls as JSON records and writes them
//! to stdout, the log, or a Redis pub/sub channel. Each record is written
//! with a single call so concurrent emitters never interleave.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::Address;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::decoder::{DecodeError, DecodedCall};
use crate::source::PendingTransaction;

/// Default Redis channel for publishing router calls
pub const DEFAULT_CHANNEL: &str = "router_calls";

/// Errors that can occur while emitting a record
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Write error: {0}")]
    Io(#[from] std::io::Error),
}

/// A router call decoded against the registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallMessage {
    /// Transaction hash with 0x prefix
    pub hash: String,
    /// Router address the transaction was sent to
    pub router: String,
    /// Human-readable method name (e.g., "swapExactTokensForTokens")
    pub method: String,
    /// Method ID with 0x prefix (e.g., "0x38ed1739")
    pub method_id: String,
    /// Arguments keyed by parameter name, in declaration order
    pub args: Map<String, Value>,
    /// Unix timestamp in milliseconds when the record was produced
    pub timestamp: u64,
}

/// A router call that could not be decoded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureMessage {
    pub hash: String,
    pub router: String,
    /// Error kind: "TooShort", "UnknownSelector" or "Malformed"
    pub error: String,
    /// Raw selector bytes with 0x prefix (fewer than 4 when the input was short)
    pub selector: String,
    pub detail: String,
    pub timestamp: u64,
}

/// One record written to a sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SinkMessage {
    Decoded(CallMessage),
    Failed(FailureMessage),
}

impl SinkMessage {
    /// Build the record for a successfully decoded call
    pub fn decoded(tx: &PendingTransaction, call: &DecodedCall) -> Self {
        SinkMessage::Decoded(CallMessage {
            hash: format!("{:#x}", tx.hash),
            router: format_router(tx.to),
            method: call.method.clone(),
            method_id: call.selector_hex(),
            args: args_to_map(&call.args),
            timestamp: current_timestamp_millis(),
        })
    }

    /// Build the diagnostic record for a call that failed to decode
    pub fn failed(tx: &PendingTransaction, error: &DecodeError) -> Self {
        let raw_selector = &tx.input[..tx.input.len().min(4)];
        SinkMessage::Failed(FailureMessage {
            hash: format!("{:#x}", tx.hash),
            router: format_router(tx.to),
            error: error.kind().to_string(),
            selector: format!("0x{}", hex::encode(raw_selector)),
            detail: error.to_string(),
            timestamp: current_timestamp_millis(),
        })
    }

    /// Transaction hash the record refers to
    pub fn hash(&self) -> &str {
        match self {
            SinkMessage::Decoded(m) => &m.hash,
            SinkMessage::Failed(m) => &m.hash,
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a message from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn format_router(to: Option<Address>) -> String {
    to.map(|a| format!("{:#x}", a)).unwrap_or_default()
}

/// Flatten decoded arguments into an ordered JSON object
pub fn args_to_map(args: &[(String, DynSolValue)]) -> Map<String, Value> {
    args.iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect()
}

/// Render a decoded value as JSON
///
/// Integers become decimal strings so 256-bit values survive JSON consumers.
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(format!("0x{}", hex::encode(&word[..*size]))),
        DynSolValue::Address(a) => Value::String(format!("{:#x}", a)),
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f))),
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Destination for pipeline records
#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, message: &SinkMessage) -> Result<(), SinkError>;
}

/// Writes one JSON line per record to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    async fn emit(&self, message: &SinkMessage) -> Result<(), SinkError> {
        let mut line = message.to_json()?;
        line.push('\n');
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(line.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Emits each record as an info-level log event
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn emit(&self, message: &SinkMessage) -> Result<(), SinkError> {
        let json = message.to_json()?;
        info!(target: "routerwatch::calls", hash = message.hash(), "{}", json);
        Ok(())
    }
}

/// Redis publisher for router call records
pub struct RedisSink {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisSink {
    /// Create a new sink with an established Redis connection
    ///
    /// # Arguments
    /// * `connection` - An established Redis multiplexed connection
    /// * `channel` - The pub/sub channel name to publish to
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Open a connection to `url` and publish to `channel`
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, SinkError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, channel))
    }

    /// Get the channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Sink for RedisSink {
    async fn emit(&self, message: &SinkMessage) -> Result<(), SinkError> {
        let json = message.to_json()?;
        // multiplexed connections are cheap to clone and share one socket
        let mut connection = self.connection.clone();
        let _subscribers: i64 = connection.publish(&self.channel, json).await?;
        Ok(())
    }
}
