//! Transaction Enrichment
//!
//! Turns a pending transaction hash into a [`TransactionRecord`]: fetches the
//! transaction from the node, recovers its sender under the node's chain id and
//! applies the eligibility filter. The chain id is queried once and cached.

use alloy::primitives::TxHash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::node::{NodeClient, NodeError};
use crate::record::{current_timestamp_secs, TransactionRecord};

/// Errors that stop enrichment of a transaction
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Failed to query chain id: {0}")]
    ChainId(#[source] NodeError),

    #[error("Failed to fetch transaction {hash}: {source}")]
    Fetch {
        hash: TxHash,
        #[source]
        source: NodeError,
    },
}

impl EnrichError {
    /// The node error behind this failure
    pub fn node_error(&self) -> &NodeError {
        match self {
            EnrichError::ChainId(e) => e,
            EnrichError::Fetch { source, .. } => source,
        }
    }
}

/// Builds records for pending transactions
pub struct Enricher {
    node: Arc<dyn NodeClient>,
    chain_id: OnceCell<u64>,
}

impl Enricher {
    /// Create an enricher that asks the node for its chain id on first use
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self {
            node,
            chain_id: OnceCell::new(),
        }
    }

    /// Create an enricher with a known chain id
    pub fn with_chain_id(node: Arc<dyn NodeClient>, chain_id: u64) -> Self {
        Self {
            node,
            chain_id: OnceCell::new_with(Some(chain_id)),
        }
    }

    /// The chain id used for sender recovery
    pub async fn chain_id(&self) -> Result<u64, EnrichError> {
        self.chain_id
            .get_or_try_init(|| async { self.node.chain_id().await.map_err(EnrichError::ChainId) })
            .await
            .copied()
    }

    /// Enrich one pending transaction
    ///
    /// # Arguments
    /// * `hash` - Hash delivered by the pending transaction subscription
    ///
    /// # Returns
    /// `Some(TransactionRecord)` for an eligible pending transaction, `None` if it
    /// is no longer pending or fails the eligibility filter
    pub async fn enrich(&self, hash: TxHash) -> Result<Option<TransactionRecord>, EnrichError> {
        let discovered_at = current_timestamp_secs();
        let chain_id = self.chain_id().await?;

        let tx = self
            .node
            .pending_transaction(hash, chain_id)
            .await
            .map_err(|source| EnrichError::Fetch { hash, source })?;

        let Some(tx) = tx else {
            return Ok(None);
        };

        match TransactionRecord::from_pending(&tx, discovered_at) {
            Ok(record) => Ok(Some(record)),
            Err(verdict) => {
                debug!(tx_hash = %hash, reason = verdict.reason(), "Skipping transaction");
                Ok(None)
            }
        }
    }
}
