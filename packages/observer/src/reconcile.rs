//! Block Reconciliation
//!
//! For every transaction in a mined block, search the store for records with a
//! matching `txHash`, delete them, and tally how many of the block's
//! transactions had been observed while pending.
//!
//! A failed lookup or delete for one transaction is counted and skipped. Losing
//! the store altogether, or a search answer that cannot be parsed, aborts the
//! whole block.

use alloy::primitives::{BlockHash, TxHash};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::node::{BlockSummary, NodeClient, NodeError};
use crate::record::{format_hash, ReconciliationResult};
use crate::store::{DocumentStore, StoreError};

/// Errors that abort reconciliation of a block
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to fetch block {hash}: {source}")]
    Block {
        hash: BlockHash,
        #[source]
        source: NodeError,
    },

    #[error("Store failure while reconciling block {block}: {source}")]
    Store {
        block: u64,
        #[source]
        source: StoreError,
    },
}

/// What happened to one transaction of the block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxOutcome {
    Found,
    Missing,
    Failed,
}

/// Whether a store error ends reconciliation of the block
fn aborts_block(e: &StoreError) -> bool {
    e.is_transport() || matches!(e, StoreError::Decode(_))
}

/// Deletes mined transactions from the store and measures coverage
#[derive(Clone)]
pub struct BlockReconciler {
    store: Arc<dyn DocumentStore>,
    node: Arc<dyn NodeClient>,
    check_receipts: bool,
}

impl BlockReconciler {
    /// Create a reconciler
    ///
    /// # Arguments
    /// * `store` - Store the pending records were written to
    /// * `node` - Used to resolve block hashes and, optionally, receipts
    /// * `check_receipts` - Fetch receipts of matched transactions to count reverts
    pub fn new(store: Arc<dyn DocumentStore>, node: Arc<dyn NodeClient>, check_receipts: bool) -> Self {
        Self {
            store,
            node,
            check_receipts,
        }
    }

    /// Resolve a new head and reconcile it
    ///
    /// # Returns
    /// `None` if the node does not know the block (e.g. reorged away)
    pub async fn reconcile_hash(&self, hash: BlockHash) -> Result<Option<ReconciliationResult>, ReconcileError> {
        let block = self
            .node
            .block(hash)
            .await
            .map_err(|source| ReconcileError::Block { hash, source })?;

        match block {
            Some(block) => self.reconcile(&block).await.map(Some),
            None => {
                warn!(block_hash = %hash, "Block not found, skipping");
                Ok(None)
            }
        }
    }

    /// Reconcile a resolved block against the store
    pub async fn reconcile(&self, block: &BlockSummary) -> Result<ReconciliationResult, ReconcileError> {
        let mut result = ReconciliationResult {
            block_number: block.number,
            total: block.transactions.len(),
            ..Default::default()
        };

        for &hash in &block.transactions {
            let outcome = self
                .reconcile_tx(hash)
                .await
                .map_err(|source| ReconcileError::Store { block: block.number, source })?;

            match outcome {
                TxOutcome::Found => {
                    result.found += 1;
                    if self.check_receipts && self.is_reverted(hash).await {
                        result.reverted += 1;
                    }
                }
                TxOutcome::Missing => {}
                TxOutcome::Failed => result.errors += 1,
            }
        }

        Ok(result)
    }

    async fn reconcile_tx(&self, hash: TxHash) -> Result<TxOutcome, StoreError> {
        let tx_hash = format_hash(hash);

        let documents = match self.store.find_by_hash(&tx_hash).await {
            Ok(documents) => documents,
            Err(e) if aborts_block(&e) => return Err(e),
            Err(e) => {
                warn!(tx_hash = %tx_hash, error = %e, "Lookup failed");
                return Ok(TxOutcome::Failed);
            }
        };

        if documents.is_empty() {
            return Ok(TxOutcome::Missing);
        }
        if documents.len() > 1 {
            debug!(tx_hash = %tx_hash, matches = documents.len(), "Multiple records for one transaction");
        }

        let mut deleted = 0;
        let mut failed = 0;
        for document in &documents {
            match self.store.delete(&document.id).await {
                Ok(true) => deleted += 1,
                // Removed concurrently by another worker
                Ok(false) => {}
                Err(e) if aborts_block(&e) => return Err(e),
                Err(e) => {
                    warn!(tx_hash = %tx_hash, id = %document.id, error = %e, "Delete failed");
                    failed += 1;
                }
            }
        }

        Ok(match (deleted, failed) {
            (0, 0) => TxOutcome::Missing,
            (0, _) => TxOutcome::Failed,
            _ => TxOutcome::Found,
        })
    }

    async fn is_reverted(&self, hash: TxHash) -> bool {
        match self.node.receipt_status(hash).await {
            Ok(Some(success)) => !success,
            Ok(None) => false,
            Err(e) => {
                warn!(tx_hash = %hash, error = %e, "Receipt lookup failed");
                false
            }
        }
    }
}
