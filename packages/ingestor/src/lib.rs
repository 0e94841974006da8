//! RouterWatch Ingestor Library
//!
//! This crate provides components for observing pending transactions sent to
//! known DEX router contracts, decoding their call data against a loaded ABI,
//! and emitting one record per routed transaction.

pub mod abi;
pub mod config;
pub mod decoder;
pub mod filter;
pub mod pipeline;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use abi::{AbiError, AbiRegistry, MethodSelector, MethodSpec};
pub use config::{ConfigError, SinkKind, WatcherConfig};
pub use decoder::{decode_call, DecodeError, DecodedCall};
pub use filter::{RouterSet, DEFAULT_ROUTERS};
pub use pipeline::{Dispatcher, Outcome, PipelineStats};
pub use sink::{LogSink, RedisSink, Sink, SinkError, SinkMessage, StdoutSink};
pub use source::{AlloyNode, NodeClient, NodeConnection, PendingTransaction, TransactionSource};
