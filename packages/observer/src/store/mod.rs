//! Document Store
//!
//! Persists [`TransactionRecord`]s in a searchable collection and removes them
//! again once mined. Backends implement [`DocumentStore`]; [`StoreWriter`] wraps
//! one with the write-path failure policy.
//!
//! Documents get a store-assigned id on write. The reconciler finds them again by
//! matching the `txHash` field, then deletes by id.

pub mod elastic;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::record::TransactionRecord;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unreachable(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store rejected request [{status}]: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Malformed store response: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the store could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(self, StoreError::Unreachable(_) | StoreError::Timeout(_))
    }
}

/// A stored record together with its store-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub record: TransactionRecord,
}

/// Searchable collection of transaction records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Collection records are written to
    fn collection(&self) -> &str;

    /// Index a record; visible to searches once this returns
    ///
    /// # Returns
    /// The store-assigned document id
    async fn index(&self, record: &TransactionRecord) -> Result<String, StoreError>;

    /// Find every document whose `txHash` field equals `tx_hash`
    async fn find_by_hash(&self, tx_hash: &str) -> Result<Vec<StoredDocument>, StoreError>;

    /// Delete a document by id
    ///
    /// # Returns
    /// `true` if a document was removed, `false` if the id was unknown
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove every document from the named collection
    ///
    /// # Returns
    /// The number of documents removed
    async fn flush(&self, collection: &str) -> Result<u64, StoreError>;
}

/// Available store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreBackend {
    /// Elasticsearch over HTTP
    Elastic,
    /// Redis, with a secondary set per transaction hash
    Redis,
    /// Process-local map, lost on exit
    Memory,
}

/// Connection settings for [`open_store`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub elastic_url: String,
    pub redis_url: String,
    pub collection: String,
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Open the configured backend
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Elastic => Arc::new(ElasticStore::new(
            &config.elastic_url,
            &config.collection,
            config.timeout,
        )?),
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&config.redis_url, &config.collection, config.timeout).await?)
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new(&config.collection)),
    };
    Ok(store)
}

/// Run a store future under an optional deadline
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StoreError::Timeout(limit))?,
        None => fut.await,
    }
}

/// What to do when the store cannot be reached on the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnreachablePolicy {
    /// Surface the error; the pipeline stops
    #[default]
    Abort,
    /// Log and drop the record, keep streaming
    Skip,
}

/// Result of a single write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored under the given id
    Indexed(String),
    /// Server refused the document; logged and dropped
    Rejected,
    /// Store unreachable under [`UnreachablePolicy::Skip`]
    Skipped,
}

/// Writes records and applies the failure policy
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn DocumentStore>,
    policy: UnreachablePolicy,
}

impl StoreWriter {
    /// Create a writer over a store
    pub fn new(store: Arc<dyn DocumentStore>, policy: UnreachablePolicy) -> Self {
        Self { store, policy }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Index a record
    ///
    /// Server-side rejections and malformed acknowledgments are logged and
    /// reported as [`WriteOutcome::Rejected`]. Transport failures follow the
    /// configured [`UnreachablePolicy`].
    pub async fn write(&self, record: &TransactionRecord) -> Result<WriteOutcome, StoreError> {
        match self.store.index(record).await {
            Ok(id) => {
                debug!(tx_hash = %record.tx_hash, id = %id, "Indexed transaction");
                Ok(WriteOutcome::Indexed(id))
            }
            Err(e) if e.is_transport() => match self.policy {
                UnreachablePolicy::Abort => {
                    error!(tx_hash = %record.tx_hash, error = %e, "Store unreachable");
                    Err(e)
                }
                UnreachablePolicy::Skip => {
                    warn!(tx_hash = %record.tx_hash, error = %e, "Store unreachable, dropping record");
                    Ok(WriteOutcome::Skipped)
                }
            },
            Err(e) => {
                warn!(tx_hash = %record.tx_hash, error = %e, "Error indexing document");
                Ok(WriteOutcome::Rejected)
            }
        }
    }
}
