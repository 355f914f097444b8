//! Error taxonomy for the observer.
//!
//! Each module owns its error enum; [`ObserverError`] gathers them for the
//! pipeline and the binary. [`ObserverError::is_fatal`] decides whether a
//! failure stops the pipeline or only the current transaction or block.

use thiserror::Error;

use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::enrich::EnrichError;
use crate::ipc::IpcError;
use crate::node::NodeError;
use crate::reconcile::ReconcileError;
use crate::store::StoreError;

/// Result alias used across the pipeline
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Top-level observer error
#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Enrichment error: {0}")]
    Enrich(#[from] EnrichError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Subscription {0} closed")]
    SubscriptionClosed(&'static str),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Whether a store failure leaves the pipeline unable to continue
fn store_is_fatal(e: &StoreError) -> bool {
    e.is_transport() || matches!(e, StoreError::Decode(_))
}

impl ObserverError {
    /// Whether this error stops the pipeline
    ///
    /// Connectivity loss, closed subscriptions, signature failures and unreadable
    /// search responses are fatal. The following only cost the item at hand:
    /// store rejections, a transaction in an envelope type the decoder does not
    /// know, and a transaction or block lookup exceeding the configured node
    /// deadline. A skipped block is not retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            ObserverError::Store(e) => store_is_fatal(e),
            ObserverError::Reconcile(ReconcileError::Store { source, .. }) => store_is_fatal(source),
            ObserverError::Reconcile(ReconcileError::Block {
                source: NodeError::Timeout { .. },
                ..
            }) => false,
            ObserverError::Enrich(EnrichError::Fetch {
                source: NodeError::Timeout { .. } | NodeError::Decode(DecodeError::UnsupportedTxType(_)),
                ..
            }) => false,
            _ => true,
        }
    }
}
