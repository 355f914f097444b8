//! Mempool Observer Library
//!
//! Streams pending transactions from an Ethereum node over IPC, indexes the
//! contract interactions among them into a search store, and on every new block
//! deletes the records that were mined while logging how many of the block's
//! transactions had been seen in the mempool.

pub mod cli;
pub mod config;
pub mod decoder;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod ipc;
pub mod node;
pub mod observability;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod store;
pub mod units;

// Re-export commonly used types
pub use config::ObserverConfig;
pub use decoder::{decode_transaction, PendingTransaction};
pub use enrich::Enricher;
pub use error::{ObserverError, ObserverResult};
pub use filter::{check_eligibility, Eligibility};
pub use node::{AlloyNode, BlockSummary, EventSource, NodeClient};
pub use pipeline::{Pipeline, PipelineConfig, PipelineSummary};
pub use reconcile::BlockReconciler;
pub use record::{ReconciliationResult, TransactionRecord};
pub use store::{DocumentStore, StoreWriter, UnreachablePolicy, WriteOutcome};
pub use units::wei_to_ether;
