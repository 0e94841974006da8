//! Transaction Source
//!
//! Handles the connection to the blockchain node over WebSocket or IPC.
//! Subscribes to pending transaction hashes, resolves each hash to the full
//! transaction, and reconnects with exponential backoff when the node drops.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::transports::ipc::IpcConnect;
use alloy::transports::ws::WsConnect;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Maximum number of reconnection attempts before giving up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Connection timeout in milliseconds
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Per-fetch timeout in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10000;

/// Buffered hashes between the subscription and the dispatcher
pub const HASH_CHANNEL_CAPACITY: usize = 4096;

/// Errors that can occur while connecting or subscribing
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid node endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// Why a single hash could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transaction not found")]
    NotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Fetch timed out after {0}ms")]
    Timeout(u64),
}

/// Node endpoint kinds that support subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://` or `wss://` URL
    Ws(String),
    /// Filesystem path to an IPC socket (tilde expanded)
    Ipc(String),
}

impl Endpoint {
    /// Classify an endpoint string
    pub fn parse(endpoint: &str) -> Result<Self, SourceError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(SourceError::InvalidEndpoint("endpoint cannot be empty".to_string()));
        }
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            return Ok(Endpoint::Ws(endpoint.to_string()));
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Err(SourceError::InvalidEndpoint(format!(
                "{endpoint}: HTTP cannot carry subscriptions, use ws:// or an IPC path"
            )));
        }
        Ok(Endpoint::Ipc(expand_path(endpoint)))
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Configuration for the node connection
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// WebSocket URL or IPC socket path
    pub endpoint: String,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
}

impl NodeConfig {
    /// Create a new config for the given endpoint with default limits
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            timeout_ms: CONNECTION_TIMEOUT_MS,
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// Node connection manager with reconnection support
pub struct NodeConnection {
    config: NodeConfig,
    reconnect_attempts: u32,
}

impl NodeConnection {
    /// Create a new connection manager
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            reconnect_attempts: 0,
        }
    }

    /// Get the configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Reset reconnection counter
    pub fn reset_reconnect_counter(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Get current reconnection attempt count
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Attempt to connect to the node
    ///
    /// Returns a pub/sub provider connected to the endpoint
    pub async fn connect(&mut self) -> Result<RootProvider<PubSubFrontend>, SourceError> {
        let endpoint = Endpoint::parse(&self.config.endpoint)?;

        if let Endpoint::Ipc(path) = &endpoint {
            if !Path::new(path).exists() {
                return Err(SourceError::SocketNotFound(path.clone()));
            }
        }

        info!("Connecting to node at {}", self.config.endpoint);

        let dial = async {
            match endpoint {
                Endpoint::Ws(url) => ProviderBuilder::new().on_ws(WsConnect::new(url)).await,
                Endpoint::Ipc(path) => {
                    let ipc: IpcConnect<String> = IpcConnect::new(path);
                    ProviderBuilder::new().on_ipc(ipc).await
                }
            }
        };

        let provider = timeout(Duration::from_millis(self.config.timeout_ms), dial)
            .await
            .map_err(|_| SourceError::Timeout(self.config.timeout_ms))?
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        self.reset_reconnect_counter();
        info!("Successfully connected to node");

        Ok(provider)
    }

    /// Attempt to reconnect with exponential backoff
    ///
    /// Returns a provider if successful, or an error if max attempts exceeded
    pub async fn reconnect(&mut self) -> Result<RootProvider<PubSubFrontend>, SourceError> {
        while self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.next_backoff_delay();
            warn!(
                "Attempting to reconnect (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );

            sleep(delay).await;
            self.reconnect_attempts += 1;

            match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => {
                    error!("Reconnection attempt {} failed: {}", self.reconnect_attempts, e);
                }
            }
        }

        Err(SourceError::MaxReconnectAttemptsExceeded(self.config.max_reconnect_attempts))
    }
}

/// Pending transaction resolved from its hash
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Transaction input data (calldata)
    pub input: Bytes,
}

/// The node operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Open a pending-transaction hash subscription
    async fn subscribe_pending(&self) -> Result<mpsc::Receiver<TxHash>, SourceError>;

    /// Fetch a transaction by hash, `None` if the node does not know it
    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<PendingTransaction>, SourceError>;
}

/// [`NodeClient`] backed by an alloy pub/sub provider
///
/// The provider multiplexes requests over one connection and is safe to share
/// across tasks, so fetches run concurrently without a lock.
#[derive(Clone)]
pub struct AlloyNode {
    provider: RootProvider<PubSubFrontend>,
}

impl AlloyNode {
    pub fn new(provider: RootProvider<PubSubFrontend>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NodeClient for AlloyNode {
    async fn subscribe_pending(&self) -> Result<mpsc::Receiver<TxHash>, SourceError> {
        let mut subscription = self
            .provider
            .subscribe_pending_transactions()
            .await
            .map_err(|e| SourceError::SubscriptionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(HASH_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(hash) => {
                        if tx.send(hash).await.is_err() {
                            debug!("Hash receiver dropped, closing subscription forwarder");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Pending transaction subscription lagged, {} hashes dropped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Pending transaction subscription closed by node");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<PendingTransaction>, SourceError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| SourceError::Provider(e.to_string()))?;

        Ok(tx.map(|tx| PendingTransaction {
            hash,
            to: tx.to(),
            input: Bytes::from(tx.input().to_vec()),
        }))
    }
}

/// Pending-transaction source shared by the dispatcher's tasks
#[derive(Clone)]
pub struct TransactionSource {
    client: Arc<dyn NodeClient>,
    fetch_timeout: Option<Duration>,
}

impl TransactionSource {
    /// Create a source with the default per-fetch timeout
    pub fn new(client: Arc<dyn NodeClient>) -> Self {
        Self {
            client,
            fetch_timeout: Some(Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS)),
        }
    }

    /// Override the per-fetch timeout, `None` waits indefinitely
    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout
    }

    /// Subscribe to pending transaction hashes
    ///
    /// The returned stream is live and unbounded; it ends when the node
    /// closes the subscription and cannot be restarted.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<TxHash>, SourceError> {
        let rx = self.client.subscribe_pending().await?;
        info!("Subscribed to pending transaction hashes");
        Ok(rx)
    }

    /// Resolve a hash to its full transaction
    pub async fn fetch(&self, hash: TxHash) -> Result<PendingTransaction, FetchError> {
        let lookup = self.client.transaction_by_hash(hash);
        let result = match self.fetch_timeout {
            Some(limit) => timeout(limit, lookup)
                .await
                .map_err(|_| FetchError::Timeout(limit.as_millis() as u64))?,
            None => lookup.await,
        };

        match result {
            Ok(Some(tx)) => Ok(tx),
            Ok(None) => Err(FetchError::NotFound),
            Err(e) => Err(FetchError::Transport(e.to_string())),
        }
    }
}
