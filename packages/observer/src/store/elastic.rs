//! Elasticsearch Backend
//!
//! Talks to the Elasticsearch REST API directly. Writes and deletes request
//! `refresh=true` so the reconciler's search sees them as soon as they are
//! acknowledged.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{DocumentStore, StoreError, StoredDocument};
use crate::record::{TransactionRecord, HASH_FIELD};

/// Default Elasticsearch endpoint
pub const DEFAULT_ELASTIC_URL: &str = "http://localhost:9200";

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: String,
    result: String,
    #[serde(rename = "_version", default)]
    version: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: TransactionRecord,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    deleted: u64,
}

/// Elasticsearch-backed [`DocumentStore`]
#[derive(Debug, Clone)]
pub struct ElasticStore {
    client: Client,
    base_url: String,
    collection: String,
    timeout: Option<Duration>,
}

impl ElasticStore {
    /// Create a store client
    ///
    /// # Arguments
    /// * `base_url` - Cluster endpoint, e.g. `http://localhost:9200`
    /// * `collection` - Index records are written to
    /// * `timeout` - Per-request deadline, `None` waits indefinitely
    pub fn new(base_url: &str, collection: &str, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let mut builder = Client::builder();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            timeout,
        })
    }

    /// Cluster endpoint without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, index: &str, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, index, path)
    }

    fn transport_error(&self, e: reqwest::Error) -> StoreError {
        match self.timeout {
            Some(limit) if e.is_timeout() => StoreError::Timeout(limit),
            _ if e.is_decode() => StoreError::Decode(e.to_string()),
            _ => StoreError::Unreachable(e.to_string()),
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(&self, response: Response) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

/// Turn a non-success response into [`StoreError::Rejected`]
async fn rejection(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Rejected { status, reason: error_reason(&body) }
}

/// Pull `type: reason` out of an Elasticsearch error body
pub(crate) fn error_reason(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    match &value["error"] {
        Value::Object(error) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("unknown");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            format!("{}: {}", kind, reason)
        }
        Value::String(reason) => reason.clone(),
        _ => body.to_string(),
    }
}

/// Whether a search failed only because the index does not exist yet
pub(crate) fn is_missing_index(status: u16, reason: &str) -> bool {
    status == StatusCode::NOT_FOUND.as_u16() && reason.starts_with("index_not_found_exception")
}

#[async_trait]
impl DocumentStore for ElasticStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn index(&self, record: &TransactionRecord) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url(&self.collection, "_doc?refresh=true"))
            .json(record)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let status = response.status();
        let ack: IndexResponse = self.decode(response).await?;
        debug!("[{}] {}; version={}", status, ack.result, ack.version);
        Ok(ack.id)
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let query = json!({
            "query": { "match": { HASH_FIELD: tx_hash } },
            "track_total_hits": true,
        });

        let response = self
            .client
            .post(self.url(&self.collection, "_search"))
            .json(&query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return match rejection(response).await {
                StoreError::Rejected { status, reason } if is_missing_index(status, &reason) => Ok(Vec::new()),
                other => Err(other),
            };
        }

        let result: SearchResponse = self.decode(response).await?;
        Ok(result
            .hits
            .hits
            .into_iter()
            .map(|hit| StoredDocument { id: hit.id, record: hit.source })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .delete(self.url(&self.collection, &format!("_doc/{}?refresh=true", id)))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(rejection(response).await),
        }
    }

    async fn flush(&self, collection: &str) -> Result<u64, StoreError> {
        let query = json!({ "query": { "match_all": {} } });

        let response = self
            .client
            .post(self.url(collection, "_delete_by_query?refresh=true"))
            .json(&query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let result: DeleteByQueryResponse = self.decode(response).await?;
        info!(index = collection, deleted = result.deleted, "Flushed index");
        Ok(result.deleted)
    }
}
