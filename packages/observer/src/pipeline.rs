//! Streaming Pipeline
//!
//! Runs the two subscriptions side by side:
//! - pending transaction hashes are enriched and written one at a time
//! - new head hashes are queued for a fixed pool of reconciliation workers
//!
//! The block queue is bounded. A block hash that is already queued or being
//! reconciled is not queued again. There is no ordering between a transaction's
//! write and a block containing it; a block that wins the race simply counts the
//! transaction as unseen.
//!
//! Every task watches a shared [`CancellationToken`]. The first fatal error
//! cancels it and is returned from [`Pipeline::run`].

use alloy::primitives::{BlockHash, TxHash};
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::enrich::Enricher;
use crate::error::{ObserverError, ObserverResult};
use crate::node::{EventSource, NEW_HEADS_TOPIC, PENDING_TRANSACTIONS_TOPIC};
use crate::record::ReconciliationResult;
use crate::reconcile::BlockReconciler;
use crate::store::{StoreWriter, WriteOutcome};

/// Default number of reconciliation workers
pub const DEFAULT_RECONCILE_WORKERS: usize = 4;

/// Default capacity of the block queue
pub const DEFAULT_BLOCK_QUEUE: usize = 64;

/// Sizing of the reconciliation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub reconcile_workers: usize,
    pub block_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reconcile_workers: DEFAULT_RECONCILE_WORKERS,
            block_queue: DEFAULT_BLOCK_QUEUE,
        }
    }
}

/// Totals reported when the pipeline stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub pending_seen: u64,
    pub records_indexed: u64,
    pub records_dropped: u64,
    pub blocks_reconciled: u64,
    pub transactions_found: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pending_seen: AtomicU64,
    records_indexed: AtomicU64,
    records_dropped: AtomicU64,
    blocks_reconciled: AtomicU64,
    transactions_found: AtomicU64,
}

impl Counters {
    fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            pending_seen: self.pending_seen.load(Ordering::Relaxed),
            records_indexed: self.records_indexed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            blocks_reconciled: self.blocks_reconciled.load(Ordering::Relaxed),
            transactions_found: self.transactions_found.load(Ordering::Relaxed),
        }
    }
}

/// Block hashes queued or being reconciled
#[derive(Debug, Default)]
struct InFlight(Mutex<HashSet<BlockHash>>);

impl InFlight {
    /// Returns `false` if the hash is already in flight
    fn insert(&self, hash: BlockHash) -> bool {
        self.with_set(|set| set.insert(hash))
    }

    fn remove(&self, hash: &BlockHash) {
        self.with_set(|set| set.remove(hash));
    }

    fn with_set<T>(&self, f: impl FnOnce(&mut HashSet<BlockHash>) -> T) -> T {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

type BlockQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<BlockHash>>>;

/// The mempool observer
pub struct Pipeline {
    events: Arc<dyn EventSource>,
    enricher: Arc<Enricher>,
    writer: StoreWriter,
    reconciler: BlockReconciler,
    config: PipelineConfig,
    shutdown: CancellationToken,
    reporter: Option<mpsc::UnboundedSender<ReconciliationResult>>,
}

impl Pipeline {
    /// Assemble a pipeline
    ///
    /// # Arguments
    /// * `events` - Source of the pending transaction and new head streams
    /// * `enricher` - Turns pending hashes into records
    /// * `writer` - Store writer with its failure policy
    /// * `reconciler` - Handles each new head
    /// * `config` - Worker and queue sizing
    pub fn new(
        events: Arc<dyn EventSource>,
        enricher: Enricher,
        writer: StoreWriter,
        reconciler: BlockReconciler,
        config: PipelineConfig,
    ) -> Self {
        Self {
            events,
            enricher: Arc::new(enricher),
            writer,
            reconciler,
            config,
            shutdown: CancellationToken::new(),
            reporter: None,
        }
    }

    /// Forward every reconciliation result to a channel
    pub fn with_reporter(mut self, reporter: mpsc::UnboundedSender<ReconciliationResult>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Token that stops the pipeline when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribe and run until cancelled or a fatal error occurs
    ///
    /// # Returns
    /// Totals on clean shutdown, otherwise the first fatal error
    pub async fn run(self) -> ObserverResult<PipelineSummary> {
        let pending = self.events.pending_transactions().await?;
        let heads = self.events.new_heads().await?;

        let counters = Arc::new(Counters::default());
        let in_flight = Arc::new(InFlight::default());
        let (queue_tx, queue_rx) = mpsc::channel(self.config.block_queue);
        let queue_rx: BlockQueue = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let mut tasks = JoinSet::new();

        tasks.spawn(pending_task(
            pending,
            self.enricher.clone(),
            self.writer.clone(),
            counters.clone(),
            self.shutdown.clone(),
        ));

        tasks.spawn(heads_task(heads, queue_tx, in_flight.clone(), self.shutdown.clone()));

        for worker in 0..self.config.reconcile_workers {
            tasks.spawn(reconcile_worker(
                worker,
                queue_rx.clone(),
                self.reconciler.clone(),
                in_flight.clone(),
                counters.clone(),
                self.reporter.clone(),
                self.shutdown.clone(),
            ));
        }

        info!(workers = self.config.reconcile_workers, queue = self.config.block_queue, "Pipeline running");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| ObserverError::Task(e.to_string())).and_then(|r| r);
            if let Err(e) = outcome {
                if first_error.is_none() {
                    error!(error = %e, "Stopping pipeline");
                    self.shutdown.cancel();
                    first_error = Some(e);
                }
            }
        }

        let summary = counters.summary();
        info!(
            pending_seen = summary.pending_seen,
            indexed = summary.records_indexed,
            blocks = summary.blocks_reconciled,
            "Pipeline stopped"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

/// Wait for the next stream item unless shut down first
///
/// `Ok(None)` means shutdown, a closed stream is an error.
async fn next_or_shutdown<T>(
    stream: &mut BoxStream<'static, T>,
    shutdown: &CancellationToken,
    topic: &'static str,
) -> ObserverResult<Option<T>> {
    tokio::select! {
        _ = shutdown.cancelled() => Ok(None),
        next = stream.next() => next.map(Some).ok_or(ObserverError::SubscriptionClosed(topic)),
    }
}

async fn pending_task(
    mut stream: BoxStream<'static, TxHash>,
    enricher: Arc<Enricher>,
    writer: StoreWriter,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) -> ObserverResult<()> {
    while let Some(hash) = next_or_shutdown(&mut stream, &shutdown, PENDING_TRANSACTIONS_TOPIC).await? {
        counters.pending_seen.fetch_add(1, Ordering::Relaxed);

        let record = match enricher.enrich(hash).await {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                let e = ObserverError::from(e);
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(tx_hash = %hash, error = %e, "Enrichment failed, skipping");
                continue;
            }
        };

        match writer.write(&record).await? {
            WriteOutcome::Indexed(_) => {
                counters.records_indexed.fetch_add(1, Ordering::Relaxed);
            }
            WriteOutcome::Rejected | WriteOutcome::Skipped => {
                counters.records_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}

async fn heads_task(
    mut stream: BoxStream<'static, BlockHash>,
    queue: mpsc::Sender<BlockHash>,
    in_flight: Arc<InFlight>,
    shutdown: CancellationToken,
) -> ObserverResult<()> {
    while let Some(hash) = next_or_shutdown(&mut stream, &shutdown, NEW_HEADS_TOPIC).await? {
        if !in_flight.insert(hash) {
            debug!(block_hash = %hash, "Block already in flight");
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            sent = queue.send(hash) => {
                if sent.is_err() {
                    // All workers are gone
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

async fn reconcile_worker(
    worker: usize,
    queue: BlockQueue,
    reconciler: BlockReconciler,
    in_flight: Arc<InFlight>,
    counters: Arc<Counters>,
    reporter: Option<mpsc::UnboundedSender<ReconciliationResult>>,
    shutdown: CancellationToken,
) -> ObserverResult<()> {
    loop {
        let hash = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = rx.recv() => match next {
                    Some(hash) => hash,
                    None => return Ok(()),
                },
            }
        };

        let reconciled = reconciler.reconcile_hash(hash).await;
        in_flight.remove(&hash);

        let result = match reconciled {
            Ok(Some(result)) => result,
            Ok(None) => continue,
            Err(e) => {
                let e = ObserverError::from(e);
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(worker, block_hash = %hash, error = %e, "Reconciliation failed");
                continue;
            }
        };

        counters.blocks_reconciled.fetch_add(1, Ordering::Relaxed);
        counters.transactions_found.fetch_add(result.found as u64, Ordering::Relaxed);

        info!(
            block = result.block_number,
            found = result.found,
            total = result.total,
            coverage = %format!("{:.2}", result.coverage_ratio()),
            errors = result.errors,
            reverted = result.reverted,
            "Block reconciled"
        );

        if let Some(reporter) = &reporter {
            let _ = reporter.send(result);
        }
    }
}
