//! RouterWatch
//!
//! Subscribes to a node's pending transactions and emits one record for every
//! call sent to a watched router.

use std::sync::Arc;

use routerwatch_ingestor::{
    AbiRegistry, AlloyNode, Dispatcher, LogSink, NodeConnection, RedisSink, Sink, SinkKind, StdoutSink,
    TransactionSource, WatcherConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = WatcherConfig::from_env()?;
    let registry = Arc::new(AbiRegistry::load_files(&config.abi_paths)?);
    let routers = Arc::new(config.routers.clone());
    info!(
        "Watching {} routers with {} known methods",
        routers.len(),
        registry.len()
    );

    let sink: Arc<dyn Sink> = match &config.sink {
        SinkKind::Redis(url) => {
            let sink = RedisSink::connect(url, config.redis_channel.clone()).await?;
            info!("Publishing records to Redis channel {}", sink.channel());
            Arc::new(sink)
        }
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Stdout => Arc::new(StdoutSink),
    };

    let mut connection = NodeConnection::new(config.node.clone());
    let mut provider = connection.connect().await?;

    loop {
        let source = TransactionSource::new(Arc::new(AlloyNode::new(provider)))
            .with_fetch_timeout(config.fetch_timeout);
        let dispatcher = Dispatcher::new(source.clone(), routers.clone(), registry.clone(), sink.clone())
            .with_max_in_flight(config.max_in_flight);
        let hashes = source.subscribe().await?;

        tokio::select! {
            _ = dispatcher.run(hashes) => {
                warn!("Pending transaction stream ended, reconnecting");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }

        provider = match connection.reconnect().await {
            Ok(provider) => provider,
            Err(e) => {
                error!("Giving up on node at {}: {}", connection.endpoint(), e);
                return Err(e.into());
            }
        };
    }
}
