//! In-process backend, used for dry runs and tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DocumentStore, StoreError, StoredDocument};
use crate::record::TransactionRecord;

#[derive(Debug, Default)]
struct Collection {
    next_id: u64,
    docs: BTreeMap<u64, TransactionRecord>,
}

/// [`DocumentStore`] kept in a process-local map
#[derive(Debug)]
pub struct MemoryStore {
    collection: String,
    state: Mutex<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            state: Mutex::new(BTreeMap::new()),
        }
    }

    /// Documents in the default collection
    pub fn len(&self) -> usize {
        self.with_state(|state| state.get(&self.collection).map_or(0, |c| c.docs.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the default collection in insertion order
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.with_state(|state| {
            state
                .get(&self.collection)
                .map(|c| c.docs.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Collection>) -> T) -> T {
        // A panic while holding the lock leaves the map consistent; keep going.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn index(&self, record: &TransactionRecord) -> Result<String, StoreError> {
        Ok(self.with_state(|state| {
            let collection = state.entry(self.collection.clone()).or_default();
            collection.next_id += 1;
            collection.docs.insert(collection.next_id, record.clone());
            collection.next_id.to_string()
        }))
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self.with_state(|state| {
            state
                .get(&self.collection)
                .map(|c| {
                    c.docs
                        .iter()
                        .filter(|(_, record)| record.tx_hash.eq_ignore_ascii_case(tx_hash))
                        .map(|(id, record)| StoredDocument { id: id.to_string(), record: record.clone() })
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Ok(id) = id.parse::<u64>() else {
            return Ok(false);
        };
        Ok(self.with_state(|state| {
            state
                .get_mut(&self.collection)
                .is_some_and(|c| c.docs.remove(&id).is_some())
        }))
    }

    async fn flush(&self, collection: &str) -> Result<u64, StoreError> {
        Ok(self.with_state(|state| {
            state
                .get_mut(collection)
                .map_or(0, |c| std::mem::take(&mut c.docs).len() as u64)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str) -> TransactionRecord {
        TransactionRecord {
            time_first_discovered: 0,
            tx_hash: hash.to_string(),
            from: "0x01".to_string(),
            to: "0x02".to_string(),
            tx_value: 0.0,
            data: "a9059cbb".to_string(),
            nonce: 0,
            gas_price: 0.0,
            gas: 0.0,
        }
    }

    #[tokio::test]
    async fn test_index_then_find_by_hash() {
        let store = MemoryStore::new("transactions");
        let id = store.index(&record("0xaa")).await.unwrap();
        store.index(&record("0xbb")).await.unwrap();

        let found = store.find_by_hash("0xaa").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].record.tx_hash, "0xaa");
    }

    #[tokio::test]
    async fn test_find_is_case_insensitive() {
        let store = MemoryStore::new("transactions");
        store.index(&record("0xAbCd")).await.unwrap();
        assert_eq!(store.find_by_hash("0xabcd").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = MemoryStore::new("transactions");
        let a = store.index(&record("0xaa")).await.unwrap();
        let b = store.index(&record("0xaa")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.find_by_hash("0xaa").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_id() {
        let store = MemoryStore::new("transactions");
        assert!(!store.delete("404").await.unwrap());
        assert!(!store.delete("not-an-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_records_in_insertion_order() {
        let store = MemoryStore::new("transactions");
        for n in 1..=12 {
            store.index(&record(&format!("0x{:02x}", n))).await.unwrap();
        }
        let hashes: Vec<String> = store.records().into_iter().map(|r| r.tx_hash).collect();
        assert_eq!(hashes.first().map(String::as_str), Some("0x01"));
        assert_eq!(hashes.last().map(String::as_str), Some("0x0c"));
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let store = MemoryStore::new("transactions");
        let id = store.index(&record("0xaa")).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(store.is_empty());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_named_collection() {
        let store = MemoryStore::new("transactions");
        for hash in ["0x01", "0x02", "0x03"] {
            store.index(&record(hash)).await.unwrap();
        }
        assert_eq!(store.flush("other").await.unwrap(), 0);
        assert_eq!(store.flush("transactions").await.unwrap(), 3);
        assert!(store.records().is_empty());
    }
}
