//! Redis Backend
//!
//! Stores each record as a JSON string under `{collection}:doc:{id}` with ids
//! drawn from `{collection}:seq`. Two sets make the collection searchable:
//! `{collection}:ids` holds every live id and `{collection}:hash:{txHash}` holds
//! the ids indexed for one transaction hash.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use super::{with_timeout, DocumentStore, StoreError, StoredDocument};
use crate::record::TransactionRecord;

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Unreachable(e.to_string())
        } else {
            StoreError::Rejected { status: 0, reason: e.to_string() }
        }
    }
}

/// Key holding the id counter
pub fn seq_key(collection: &str) -> String {
    format!("{}:seq", collection)
}

/// Key holding the set of live ids
pub fn ids_key(collection: &str) -> String {
    format!("{}:ids", collection)
}

/// Key holding one document
pub fn doc_key(collection: &str, id: &str) -> String {
    format!("{}:doc:{}", collection, id)
}

/// Key holding the ids indexed under one transaction hash
pub fn hash_key(collection: &str, tx_hash: &str) -> String {
    format!("{}:hash:{}", collection, tx_hash.to_ascii_lowercase())
}

/// Redis-backed [`DocumentStore`]
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    collection: String,
    timeout: Option<Duration>,
}

impl RedisStore {
    /// Wrap an established connection
    pub fn new(connection: MultiplexedConnection, collection: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            connection,
            collection: collection.into(),
            timeout,
        }
    }

    /// Connect to a Redis server
    pub async fn connect(url: &str, collection: &str, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let connection = with_timeout(timeout, async {
            client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Unreachable(e.to_string()))
        })
        .await?;

        info!("Connected to Redis at {}", url);
        Ok(Self::new(connection, collection, timeout))
    }

    async fn load(&self, id: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.get(doc_key(&self.collection, id)).await?;
        json.map(|j| TransactionRecord::from_json(&j).map_err(|e| StoreError::Decode(e.to_string())))
            .transpose()
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn index(&self, record: &TransactionRecord) -> Result<String, StoreError> {
        let json = record.to_json()?;
        with_timeout(self.timeout, async {
            let mut conn = self.connection.clone();
            let seq: u64 = conn.incr(seq_key(&self.collection), 1u64).await?;
            let id = seq.to_string();

            let _: () = redis::pipe()
                .atomic()
                .set(doc_key(&self.collection, &id), &json)
                .ignore()
                .sadd(ids_key(&self.collection), &id)
                .ignore()
                .sadd(hash_key(&self.collection, &record.tx_hash), &id)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(id)
        })
        .await
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Vec<StoredDocument>, StoreError> {
        with_timeout(self.timeout, async {
            let mut conn = self.connection.clone();
            let ids: Vec<String> = conn.smembers(hash_key(&self.collection, tx_hash)).await?;

            let mut documents = Vec::with_capacity(ids.len());
            for id in ids {
                // A concurrent delete may have removed the body already
                if let Some(record) = self.load(&id).await? {
                    documents.push(StoredDocument { id, record });
                }
            }
            Ok(documents)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        with_timeout(self.timeout, async {
            let Some(record) = self.load(id).await? else {
                return Ok(false);
            };

            let mut conn = self.connection.clone();
            let (removed,): (u64,) = redis::pipe()
                .atomic()
                .del(doc_key(&self.collection, id))
                .srem(ids_key(&self.collection), id)
                .ignore()
                .srem(hash_key(&self.collection, &record.tx_hash), id)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn flush(&self, collection: &str) -> Result<u64, StoreError> {
        with_timeout(self.timeout, async {
            let mut conn = self.connection.clone();
            let ids: Vec<String> = conn.smembers(ids_key(collection)).await?;

            let mut keys = vec![ids_key(collection)];
            for id in &ids {
                let json: Option<String> = conn.get(doc_key(collection, id)).await?;
                if let Some(record) = json.and_then(|j| TransactionRecord::from_json(&j).ok()) {
                    keys.push(hash_key(collection, &record.tx_hash));
                }
                keys.push(doc_key(collection, id));
            }

            let _: () = conn.del(keys).await?;
            info!(index = collection, deleted = ids.len(), "Flushed index");
            Ok(ids.len() as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Key layout tests ====================

    #[test]
    fn test_key_layout() {
        assert_eq!(seq_key("transactions"), "transactions:seq");
        assert_eq!(ids_key("transactions"), "transactions:ids");
        assert_eq!(doc_key("transactions", "17"), "transactions:doc:17");
        assert_eq!(hash_key("transactions", "0xab"), "transactions:hash:0xab");
    }

    #[test]
    fn test_hash_key_is_case_insensitive() {
        assert_eq!(
            hash_key("transactions", "0xABCDEF"),
            hash_key("transactions", "0xabcdef")
        );
    }

    // ==================== Error mapping tests ====================

    #[test]
    fn test_io_error_maps_to_unreachable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: StoreError = redis::RedisError::from(io).into();
        assert!(err.is_transport());
    }

    #[test]
    fn test_response_error_maps_to_rejected() {
        let err: StoreError = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE")).into();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }

    // ==================== Connection tests ====================

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let result = RedisStore::connect("redis://127.0.0.1:1", "transactions", Some(Duration::from_secs(2))).await;
        assert!(matches!(result, Err(e) if e.is_transport()));
    }
}
