//! Configuration
//!
//! Every setting is a command-line flag bound to an environment variable, so a
//! `.env` file (loaded with `dotenvy`), the process environment and explicit
//! flags all feed the same [`ObserverConfig`]. Flags win over the environment.
//!
//! ## Environment Variables
//!
//! - `OBSERVER_IPC_PATH`: node IPC socket (default: first known socket, else `~/.ethereum/geth.ipc`)
//! - `OBSERVER_STORE`: `elastic`, `redis` or `memory` (default: `elastic`)
//! - `ELASTICSEARCH_URL`: Elasticsearch endpoint (default: `http://localhost:9200`)
//! - `REDIS_URL`: Redis endpoint (default: `redis://127.0.0.1:6379`)
//! - `OBSERVER_COLLECTION`: collection records are written to (default: `transactions`)
//! - `OBSERVER_RECONCILE_WORKERS`: reconciliation workers (default: 4)
//! - `OBSERVER_BLOCK_QUEUE`: queued block capacity (default: 64)
//! - `OBSERVER_NODE_TIMEOUT_MS` / `OBSERVER_STORE_TIMEOUT_MS`: per-call deadlines (default: none)
//! - `OBSERVER_ON_STORE_UNREACHABLE`: `abort` or `skip` (default: `abort`)
//! - `OBSERVER_CHECK_RECEIPTS`: count reverted transactions (default: false)
//! - `OBSERVER_CONNECT_RETRIES`: extra IPC connection attempts (default: 0)

use clap::Args;
use std::time::Duration;
use thiserror::Error;

use crate::ipc::{default_ipc_path, validate_ipc_path, IpcConfig};
use crate::pipeline::{PipelineConfig, DEFAULT_BLOCK_QUEUE, DEFAULT_RECONCILE_WORKERS};
use crate::record::DEFAULT_COLLECTION;
use crate::store::elastic::DEFAULT_ELASTIC_URL;
use crate::store::redis_store::DEFAULT_REDIS_URL;
use crate::store::{StoreBackend, StoreConfig, UnreachablePolicy};

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { key, reason: reason.into() }
    }
}

/// Runtime configuration of the observer
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ObserverConfig {
    /// Path to the node's IPC socket
    #[arg(long, env = "OBSERVER_IPC_PATH", default_value_t = default_ipc_path())]
    pub ipc_path: String,

    /// Document store backend
    #[arg(long, env = "OBSERVER_STORE", value_enum, default_value_t = StoreBackend::Elastic)]
    pub store: StoreBackend,

    /// Elasticsearch endpoint
    #[arg(long, env = "ELASTICSEARCH_URL", default_value = DEFAULT_ELASTIC_URL)]
    pub elastic_url: String,

    /// Redis endpoint
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Collection records are written to
    #[arg(long, env = "OBSERVER_COLLECTION", default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Number of block reconciliation workers
    #[arg(long, env = "OBSERVER_RECONCILE_WORKERS", default_value_t = DEFAULT_RECONCILE_WORKERS)]
    pub reconcile_workers: usize,

    /// Capacity of the queue of blocks awaiting reconciliation
    #[arg(long, env = "OBSERVER_BLOCK_QUEUE", default_value_t = DEFAULT_BLOCK_QUEUE)]
    pub block_queue: usize,

    /// Deadline for each node call in milliseconds; unset waits indefinitely
    #[arg(long, env = "OBSERVER_NODE_TIMEOUT_MS")]
    pub node_timeout_ms: Option<u64>,

    /// Deadline for each store call in milliseconds; unset waits indefinitely
    #[arg(long, env = "OBSERVER_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: Option<u64>,

    /// What to do with a record when the store cannot be reached
    #[arg(long, env = "OBSERVER_ON_STORE_UNREACHABLE", value_enum, default_value_t = UnreachablePolicy::Abort)]
    pub on_store_unreachable: UnreachablePolicy,

    /// Fetch receipts of matched transactions and count reverts
    #[arg(long, env = "OBSERVER_CHECK_RECEIPTS")]
    pub check_receipts: bool,

    /// Extra IPC connection attempts before giving up
    #[arg(long, env = "OBSERVER_CONNECT_RETRIES", default_value_t = 0)]
    pub connect_retries: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            ipc_path: default_ipc_path(),
            store: StoreBackend::Elastic,
            elastic_url: DEFAULT_ELASTIC_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            reconcile_workers: DEFAULT_RECONCILE_WORKERS,
            block_queue: DEFAULT_BLOCK_QUEUE,
            node_timeout_ms: None,
            store_timeout_ms: None,
            on_store_unreachable: UnreachablePolicy::Abort,
            check_receipts: false,
            connect_retries: 0,
        }
    }
}

impl ObserverConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ipc_path(&self.ipc_path).map_err(|e| ConfigError::invalid("ipc_path", e.to_string()))?;

        if self.collection.trim().is_empty() {
            return Err(ConfigError::invalid("collection", "must not be empty"));
        }
        if self.reconcile_workers == 0 {
            return Err(ConfigError::invalid("reconcile_workers", "must be at least 1"));
        }
        if self.block_queue == 0 {
            return Err(ConfigError::invalid("block_queue", "must be at least 1"));
        }
        if self.node_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("node_timeout_ms", "must be positive when set"));
        }
        if self.store_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("store_timeout_ms", "must be positive when set"));
        }

        match self.store {
            StoreBackend::Elastic if self.elastic_url.trim().is_empty() => {
                Err(ConfigError::invalid("elastic_url", "must not be empty"))
            }
            StoreBackend::Redis if self.redis_url.trim().is_empty() => {
                Err(ConfigError::invalid("redis_url", "must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Per-call node deadline
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    /// Per-call store deadline
    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }

    /// Settings for [`crate::store::open_store`]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            backend: self.store,
            elastic_url: self.elastic_url.clone(),
            redis_url: self.redis_url.clone(),
            collection: self.collection.clone(),
            timeout: self.store_timeout(),
        }
    }

    /// Settings for [`crate::ipc::IpcConnection`]
    pub fn ipc_config(&self) -> IpcConfig {
        IpcConfig {
            connect_retries: self.connect_retries,
            ..IpcConfig::with_path(self.ipc_path.clone())
        }
    }

    /// Sizing of the reconciliation stage
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            reconcile_workers: self.reconcile_workers,
            block_queue: self.block_queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Parser, Debug)]
    struct EnvOnly {
        #[command(flatten)]
        config: ObserverConfig,
    }

    fn parse(args: &[&str]) -> ObserverConfig {
        let mut argv = vec!["mempool-observer"];
        argv.extend_from_slice(args);
        EnvOnly::try_parse_from(argv).unwrap().config
    }

    // ==================== Parsing tests ====================

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--ipc-path",
            "/tmp/reth.ipc",
            "--store",
            "redis",
            "--collection",
            "mempool",
            "--reconcile-workers",
            "8",
            "--block-queue",
            "16",
            "--node-timeout-ms",
            "1500",
            "--on-store-unreachable",
            "skip",
            "--check-receipts",
            "--connect-retries",
            "3",
        ]);

        assert_eq!(config.ipc_path, "/tmp/reth.ipc");
        assert_eq!(config.store, StoreBackend::Redis);
        assert_eq!(config.collection, "mempool");
        assert_eq!(config.reconcile_workers, 8);
        assert_eq!(config.block_queue, 16);
        assert_eq!(config.node_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.store_timeout(), None);
        assert_eq!(config.on_store_unreachable, UnreachablePolicy::Skip);
        assert!(config.check_receipts);
        assert_eq!(config.connect_retries, 3);
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let result = EnvOnly::try_parse_from(["mempool-observer", "--store", "postgres"]);
        assert!(result.is_err());
    }

    // ==================== validate tests ====================

    #[test]
    fn test_default_config_is_valid() {
        let config = ObserverConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.collection, "transactions");
        assert_eq!(config.on_store_unreachable, UnreachablePolicy::Abort);
        assert_eq!(config.node_timeout(), None);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = ObserverConfig { reconcile_workers: 0, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "reconcile_workers", .. })
        ));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let config = ObserverConfig { block_queue: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "block_queue", .. })));
    }

    #[test]
    fn test_empty_collection_rejected() {
        let config = ObserverConfig { collection: "  ".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "collection", .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ObserverConfig { store_timeout_ms: Some(0), ..Default::default() };
        assert_err!(config.validate());
    }

    #[test]
    fn test_empty_url_for_selected_backend_rejected() {
        let config = ObserverConfig {
            store: StoreBackend::Redis,
            redis_url: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "redis_url", .. })));

        let config = ObserverConfig {
            store: StoreBackend::Memory,
            redis_url: String::new(),
            elastic_url: String::new(),
            ..Default::default()
        };
        assert_ok!(config.validate());
    }

    // ==================== Conversion tests ====================

    #[test]
    fn test_derived_configs() {
        let config = ObserverConfig {
            ipc_path: "/tmp/geth.ipc".into(),
            connect_retries: 2,
            store_timeout_ms: Some(250),
            ..Default::default()
        };

        let ipc = config.ipc_config();
        assert_eq!(ipc.socket_path, "/tmp/geth.ipc");
        assert_eq!(ipc.connect_retries, 2);

        let store = config.store_config();
        assert_eq!(store.collection, "transactions");
        assert_eq!(store.timeout, Some(Duration::from_millis(250)));

        assert_eq!(config.pipeline_config(), PipelineConfig::default());
    }
}
