//! Node Access
//!
//! The two seams the pipeline needs from a node: [`NodeClient`] for request /
//! response queries and [`EventSource`] for the `newPendingTransactions` and
//! `newHeads` subscriptions. [`AlloyNode`] implements both over an alloy
//! pub-sub provider (IPC or WebSocket).

use alloy::primitives::{BlockHash, TxHash};
use alloy::providers::{Provider, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::BlockTransactionsKind;
use alloy::transports::TransportResult;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::future::IntoFuture;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::decoder::{decode_transaction, is_pending, DecodeError, PendingTransaction};

/// Subscription topic for pending transaction hashes
pub const PENDING_TRANSACTIONS_TOPIC: &str = "newPendingTransactions";

/// Subscription topic for new block headers
pub const NEW_HEADS_TOPIC: &str = "newHeads";

/// Errors that can occur while talking to the node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("RPC call {method} failed: {reason}")]
    Rpc { method: &'static str, reason: String },

    #[error("RPC call {method} timed out after {limit:?}")]
    Timeout { method: &'static str, limit: Duration },

    #[error("Subscription to {topic} failed: {reason}")]
    Subscription { topic: &'static str, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Mined block reduced to what reconciliation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub hash: BlockHash,
    pub number: u64,
    pub transactions: Vec<TxHash>,
}

/// Request / response queries against the node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// The chain id the node is serving
    async fn chain_id(&self) -> Result<u64, NodeError>;

    /// Fetch a transaction by hash and recover its sender
    ///
    /// # Returns
    /// `None` if the node no longer knows the transaction or it is already mined
    async fn pending_transaction(
        &self,
        hash: TxHash,
        chain_id: u64,
    ) -> Result<Option<PendingTransaction>, NodeError>;

    /// Fetch a block with its transaction hashes
    async fn block(&self, hash: BlockHash) -> Result<Option<BlockSummary>, NodeError>;

    /// Execution status from the receipt, `None` while no receipt exists
    async fn receipt_status(&self, hash: TxHash) -> Result<Option<bool>, NodeError>;
}

/// Long-lived node subscriptions
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Hashes of newly observed pending transactions
    async fn pending_transactions(&self) -> Result<BoxStream<'static, TxHash>, NodeError>;

    /// Hashes of newly mined blocks
    async fn new_heads(&self) -> Result<BoxStream<'static, BlockHash>, NodeError>;
}

/// [`NodeClient`] and [`EventSource`] over an alloy pub-sub provider
#[derive(Clone)]
pub struct AlloyNode {
    provider: RootProvider<PubSubFrontend>,
    timeout: Option<Duration>,
}

impl AlloyNode {
    /// Wrap a connected provider
    ///
    /// # Arguments
    /// * `provider` - Provider from [`crate::ipc::IpcConnection::connect`]
    /// * `timeout` - Per-call deadline, `None` waits indefinitely
    pub fn new(provider: RootProvider<PubSubFrontend>, timeout: Option<Duration>) -> Self {
        Self { provider, timeout }
    }

    async fn call<T, F>(&self, method: &'static str, request: F) -> Result<T, NodeError>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request.into_future())
                .await
                .map_err(|_| NodeError::Timeout { method, limit })?,
            None => request.await,
        };
        result.map_err(|e| NodeError::Rpc { method, reason: e.to_string() })
    }
}

#[async_trait]
impl NodeClient for AlloyNode {
    async fn chain_id(&self) -> Result<u64, NodeError> {
        self.call("eth_chainId", self.provider.get_chain_id()).await
    }

    async fn pending_transaction(
        &self,
        hash: TxHash,
        chain_id: u64,
    ) -> Result<Option<PendingTransaction>, NodeError> {
        let tx = self
            .call("eth_getTransactionByHash", self.provider.get_transaction_by_hash(hash))
            .await?;

        match tx {
            Some(tx) if is_pending(&tx) => Ok(Some(decode_transaction(&tx, chain_id)?)),
            Some(_) => {
                debug!(tx_hash = %hash, "Transaction already mined");
                Ok(None)
            }
            None => {
                debug!(tx_hash = %hash, "Transaction no longer known to node");
                Ok(None)
            }
        }
    }

    async fn block(&self, hash: BlockHash) -> Result<Option<BlockSummary>, NodeError> {
        let block = self
            .call(
                "eth_getBlockByHash",
                self.provider.get_block_by_hash(hash, BlockTransactionsKind::Hashes),
            )
            .await?;

        Ok(block.map(|block| BlockSummary {
            hash,
            number: block.header.number,
            transactions: block.transactions.hashes().collect(),
        }))
    }

    async fn receipt_status(&self, hash: TxHash) -> Result<Option<bool>, NodeError> {
        let receipt = self
            .call("eth_getTransactionReceipt", self.provider.get_transaction_receipt(hash))
            .await?;
        Ok(receipt.map(|r| r.status()))
    }
}

#[async_trait]
impl EventSource for AlloyNode {
    async fn pending_transactions(&self) -> Result<BoxStream<'static, TxHash>, NodeError> {
        let sub = self
            .provider
            .subscribe_pending_transactions()
            .await
            .map_err(|e| NodeError::Subscription {
                topic: PENDING_TRANSACTIONS_TOPIC,
                reason: e.to_string(),
            })?;

        info!("Subscribed to new pending transactions");
        Ok(sub.into_stream().boxed())
    }

    async fn new_heads(&self) -> Result<BoxStream<'static, BlockHash>, NodeError> {
        let sub = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| NodeError::Subscription {
                topic: NEW_HEADS_TOPIC,
                reason: e.to_string(),
            })?;

        info!("Subscribed to new blocks");
        Ok(sub.into_stream().map(|header| header.hash).boxed())
    }
}
