//! Pipeline Dispatcher
//!
//! Consumes the pending-hash stream and hands every hash to its own task,
//! which fetches the transaction, checks the router set, decodes the call
//! data and writes one record to the sink. The consumer loop never waits on
//! a fetch or a decode.

use std::sync::Arc;

use alloy::primitives::TxHash;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::abi::AbiRegistry;
use crate::decoder::decode_call;
use crate::filter::RouterSet;
use crate::sink::{Sink, SinkMessage};
use crate::source::{FetchError, TransactionSource};

/// What happened to a single hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fetch failed or the node no longer knows the hash
    FetchFailed(FetchError),
    /// Destination is not a watched router
    NotRouter,
    /// Decoded and written to the sink
    Decoded,
    /// Decode failed, diagnostic written to the sink
    DecodeFailed,
    /// The sink rejected the record
    SinkFailed,
}

/// Counters accumulated over one subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub fetch_failed: u64,
    pub not_router: u64,
    pub decoded: u64,
    pub decode_failed: u64,
    pub sink_failed: u64,
    pub panicked: u64,
}

impl PipelineStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::FetchFailed(_) => self.fetch_failed += 1,
            Outcome::NotRouter => self.not_router += 1,
            Outcome::Decoded => self.decoded += 1,
            Outcome::DecodeFailed => self.decode_failed += 1,
            Outcome::SinkFailed => self.sink_failed += 1,
        }
    }

    /// Records written to the sink, decoded or not
    pub fn emitted(&self) -> u64 {
        self.decoded + self.decode_failed
    }
}

/// Fan-out dispatcher from the hash stream to the sink
///
/// Registry and router set are shared read-only by every task.
#[derive(Clone)]
pub struct Dispatcher {
    source: TransactionSource,
    routers: Arc<RouterSet>,
    registry: Arc<AbiRegistry>,
    sink: Arc<dyn Sink>,
    limit: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(
        source: TransactionSource,
        routers: Arc<RouterSet>,
        registry: Arc<AbiRegistry>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            source,
            routers,
            registry,
            sink,
            limit: None,
        }
    }

    /// Bound the number of hashes processed at once
    ///
    /// When the bound is reached the consumer loop waits for a free slot
    /// before taking the next hash. `None` leaves the fan-out unbounded.
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.limit = max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Drive the pipeline until the hash stream ends
    ///
    /// Waits for every in-flight task before returning.
    pub async fn run(&self, mut hashes: mpsc::Receiver<TxHash>) -> PipelineStats {
        let mut stats = PipelineStats::default();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                next = hashes.recv() => {
                    let Some(hash) = next else { break };
                    stats.received += 1;
                    self.dispatch(&mut tasks, hash).await;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::reap(&mut stats, joined);
                }
            }
        }

        debug!("Hash stream ended, waiting for {} in-flight tasks", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            Self::reap(&mut stats, joined);
        }

        info!(
            received = stats.received,
            decoded = stats.decoded,
            decode_failed = stats.decode_failed,
            not_router = stats.not_router,
            fetch_failed = stats.fetch_failed,
            sink_failed = stats.sink_failed,
            panicked = stats.panicked,
            "Pending transaction stream finished"
        );
        stats
    }

    async fn dispatch(&self, tasks: &mut JoinSet<Outcome>, hash: TxHash) {
        let permit = match &self.limit {
            Some(limit) => match limit.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            None => None,
        };

        let this = self.clone();
        tasks.spawn(async move {
            let outcome = this.process(hash).await;
            drop(permit);
            outcome
        });
    }

    fn reap(stats: &mut PipelineStats, joined: Result<Outcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => stats.record(&outcome),
            Err(e) => {
                error!("Transaction task failed: {}", e);
                stats.panicked += 1;
            }
        }
    }

    /// Fetch, filter, decode and emit a single hash
    ///
    /// Every failure stays inside this call; nothing is retried.
    pub async fn process(&self, hash: TxHash) -> Outcome {
        let tx = match self.source.fetch(hash).await {
            Ok(tx) => tx,
            Err(e) => {
                debug!(hash = %hash, "Skipping transaction: {}", e);
                return Outcome::FetchFailed(e);
            }
        };

        if !self.routers.is_router(tx.to.as_ref()) {
            return Outcome::NotRouter;
        }

        let (message, outcome) = match decode_call(&self.registry, &tx.input) {
            Ok(call) => {
                debug!(hash = %hash, method = %call.method, "Decoded router call");
                (SinkMessage::decoded(&tx, &call), Outcome::Decoded)
            }
            Err(e) => {
                warn!(hash = %hash, kind = e.kind(), "Failed to decode router call: {}", e);
                (SinkMessage::failed(&tx, &e), Outcome::DecodeFailed)
            }
        };

        match self.sink.emit(&message).await {
            Ok(()) => outcome,
            Err(e) => {
                warn!(hash = %hash, "Failed to write record: {}", e);
                Outcome::SinkFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use crate::source::{MockNodeClient, PendingTransaction, SourceError};
    use alloy::primitives::{Address, Bytes};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ROUTER: Address = Address::repeat_byte(0x7a);

    const PING_ABI: &str = r#"[
        {"type":"function","name":"ping","stateMutability":"nonpayable","inputs":[],"outputs":[]}
    ]"#;

    fn ping() -> Vec<u8> {
        let registry = AbiRegistry::from_json(PING_ABI).unwrap();
        let selector = registry.methods().next().unwrap().selector.to_vec();
        selector
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<SinkMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn emit(&self, message: &SinkMessage) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Io(std::io::Error::other("sink closed")));
            }
            self.records.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn tx(hash: TxHash, to: Option<Address>, input: Vec<u8>) -> PendingTransaction {
        PendingTransaction {
            hash,
            to,
            input: Bytes::from(input),
        }
    }

    fn dispatcher(node: MockNodeClient, sink: Arc<RecordingSink>) -> Dispatcher {
        Dispatcher::new(
            TransactionSource::new(Arc::new(node)),
            Arc::new(RouterSet::new([ROUTER])),
            Arc::new(AbiRegistry::from_json(PING_ABI).unwrap()),
            sink,
        )
    }

    // ==================== process tests ====================

    #[tokio::test]
    async fn test_process_decodes_router_call() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, Some(ROUTER), ping()))));
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(node, sink.clone()).process(TxHash::repeat_byte(1)).await;

        assert_eq!(outcome, Outcome::Decoded);
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], SinkMessage::Decoded(m) if m.method == "ping" && m.args.is_empty()));
    }

    #[tokio::test]
    async fn test_process_skips_non_router() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, Some(Address::repeat_byte(0x01)), ping()))));
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(node, sink.clone()).process(TxHash::repeat_byte(1)).await;

        assert_eq!(outcome, Outcome::NotRouter);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_skips_contract_creation() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, None, ping()))));
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(node, sink.clone()).process(TxHash::repeat_byte(1)).await;

        assert_eq!(outcome, Outcome::NotRouter);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_skips_missing_transaction() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash().returning(|_| Ok(None));
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(node, sink.clone()).process(TxHash::repeat_byte(1)).await;

        assert_eq!(outcome, Outcome::FetchFailed(FetchError::NotFound));
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_emits_failure_for_short_call_data() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, Some(ROUTER), ping()[..2].to_vec()))));
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(node, sink.clone()).process(TxHash::repeat_byte(1)).await;

        assert_eq!(outcome, Outcome::DecodeFailed);
        let records = sink.records.lock().unwrap();
        assert!(matches!(&records[0], SinkMessage::Failed(m) if m.error == "TooShort"));
    }

    #[tokio::test]
    async fn test_process_reports_sink_failure() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, Some(ROUTER), ping()))));
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });

        let outcome = dispatcher(node, sink).process(TxHash::repeat_byte(1)).await;
        assert_eq!(outcome, Outcome::SinkFailed);
    }

    // ==================== run tests ====================

    #[tokio::test]
    async fn test_run_counts_every_outcome() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash().returning(|h| match h[0] {
            1 => Ok(Some(tx(h, Some(ROUTER), ping()))),
            2 => Ok(Some(tx(h, Some(ROUTER), vec![0xff; 4]))),
            3 => Ok(Some(tx(h, Some(Address::ZERO), ping()))),
            4 => Ok(None),
            _ => Err(SourceError::Provider("reset".to_string())),
        });
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(node, sink.clone());

        let (sender, hashes) = mpsc::channel(16);
        for b in 1..=5u8 {
            sender.send(TxHash::repeat_byte(b)).await.unwrap();
        }
        drop(sender);

        let stats = dispatcher.run(hashes).await;

        assert_eq!(stats.received, 5);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.decode_failed, 1);
        assert_eq!(stats.not_router, 1);
        assert_eq!(stats.fetch_failed, 2);
        assert_eq!(stats.emitted(), 2);
        assert_eq!(sink.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_with_bounded_in_flight() {
        let mut node = MockNodeClient::new();
        node.expect_transaction_by_hash()
            .returning(|h| Ok(Some(tx(h, Some(ROUTER), ping()))));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(node, sink.clone()).with_max_in_flight(Some(2));

        let (sender, hashes) = mpsc::channel(64);
        for i in 0..20u8 {
            sender.send(TxHash::repeat_byte(i)).await.unwrap();
        }
        drop(sender);

        let stats = dispatcher.run(hashes).await;
        assert_eq!(stats.decoded, 20);
        assert_eq!(sink.records.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_run_on_empty_stream() {
        let node = MockNodeClient::new();
        let sink = Arc::new(RecordingSink::default());
        let (sender, hashes) = mpsc::channel(1);
        drop(sender);

        let stats = dispatcher(node, sink).run(hashes).await;
        assert_eq!(stats, PipelineStats::default());
    }
}
