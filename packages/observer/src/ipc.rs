//! Node socket discovery and connection.
//!
//! The observer talks to its node over a Unix domain socket. When no path is
//! configured the usual geth and anvil locations are probed and the first one
//! present wins. Connecting is a single attempt by default; `connect_retries`
//! turns it into a bounded retry loop with doubling delays.

use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::pubsub::PubSubFrontend;
use alloy::transports::ipc::IpcConnect;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Where geth puts its socket unless told otherwise
pub const DEFAULT_IPC_PATH: &str = "~/.ethereum/geth.ipc";

/// Probed in order when no socket is configured
pub const KNOWN_IPC_PATHS: &[&str] = &[
    DEFAULT_IPC_PATH,
    "/var/run/geth.ipc",
    "~/.foundry/anvil.ipc",
    "/tmp/anvil.ipc",
];

/// First retry delay
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Upper bound on any single retry delay
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Limit on one connection handshake
pub const CONNECTION_TIMEOUT_MS: u64 = 5_000;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("no node socket at {0}")]
    SocketNotFound(String),

    #[error("handshake with {path} failed: {reason}")]
    Handshake { path: String, reason: String },

    #[error("handshake did not complete within {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("node socket unreachable after {attempts} attempts: {last}")]
    AttemptsExhausted { attempts: u32, last: Box<IpcError> },

    #[error("bad socket path: {0}")]
    InvalidPath(String),
}

/// Doubling delay between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_ms: INITIAL_BACKOFF_MS,
            max_ms: MAX_BACKOFF_MS,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (zero-based), capped at `max_ms`.
    pub fn delay(&self, retry: u32) -> Duration {
        let scaled = self.initial_ms.saturating_mul(1u64 << retry.min(16));
        Duration::from_millis(scaled.min(self.max_ms))
    }
}

#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: String,
    /// Attempts after the first failure. Zero surfaces the first error as-is.
    pub connect_retries: u32,
    pub backoff: Backoff,
    pub timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self::with_path(default_ipc_path())
    }
}

impl IpcConfig {
    pub fn with_path(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_retries: 0,
            backoff: Backoff::default(),
            timeout_ms: CONNECTION_TIMEOUT_MS,
        }
    }
}

/// Replace a leading `~/` with the home directory. Anything else is returned unchanged.
pub fn expand_path(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).display().to_string(),
        _ => path.to_owned(),
    }
}

/// Whether anything exists at `path` after `~` expansion.
pub fn socket_exists(path: &str) -> bool {
    Path::new(&expand_path(path)).exists()
}

/// The first of [`KNOWN_IPC_PATHS`] present on this machine, expanded.
pub fn find_ipc_socket() -> Option<String> {
    let found = KNOWN_IPC_PATHS.iter().copied().find(|p| socket_exists(p))?;
    Some(expand_path(found))
}

/// A discovered socket, or the geth default when none is present.
pub fn default_ipc_path() -> String {
    find_ipc_socket().unwrap_or_else(|| expand_path(DEFAULT_IPC_PATH))
}

/// Reject blank paths. Unusual names are only warned about since reth and
/// custom setups do not always use the `.ipc` suffix.
pub fn validate_ipc_path(path: &str) -> Result<(), IpcError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(IpcError::InvalidPath("empty".to_owned()));
    }
    if Path::new(trimmed).extension().map_or(true, |ext| ext != "ipc") {
        warn!(path = trimmed, "Socket path has no .ipc suffix");
    }
    Ok(())
}

/// Opens pub-sub providers over the configured socket.
pub struct IpcConnection {
    config: IpcConfig,
    failures: u32,
}

impl IpcConnection {
    pub fn new(config: IpcConfig) -> Self {
        Self { config, failures: 0 }
    }

    pub fn with_path(socket_path: impl Into<String>) -> Self {
        Self::new(IpcConfig::with_path(socket_path))
    }

    pub fn socket_path(&self) -> &str {
        &self.config.socket_path
    }

    /// Failed attempts since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.failures
    }

    /// One connection attempt, bounded by `timeout_ms`.
    ///
    /// # Returns
    /// A provider ready for `eth_subscribe`, or the reason the attempt failed
    pub async fn connect(&mut self) -> Result<RootProvider<PubSubFrontend>, IpcError> {
        let path = expand_path(&self.config.socket_path);
        if !Path::new(&path).exists() {
            return Err(IpcError::SocketNotFound(path));
        }

        debug!(path = %path, "Opening node socket");
        let limit_ms = self.config.timeout_ms;
        let handshake = ProviderBuilder::new().on_ipc(IpcConnect::new(path.clone()));
        let provider = match tokio::time::timeout(Duration::from_millis(limit_ms), handshake).await {
            Err(_) => return Err(IpcError::Timeout { limit_ms }),
            Ok(Err(e)) => {
                return Err(IpcError::Handshake {
                    path,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(provider)) => provider,
        };

        self.failures = 0;
        info!(path = %path, "Connected to node");
        Ok(provider)
    }

    /// [`Self::connect`] with up to `connect_retries` further attempts.
    ///
    /// # Returns
    /// The first error unchanged when retries are disabled, otherwise
    /// [`IpcError::AttemptsExhausted`] wrapping the last failure
    pub async fn connect_with_retries(&mut self) -> Result<RootProvider<PubSubFrontend>, IpcError> {
        let retries = self.config.connect_retries;
        loop {
            let err = match self.connect().await {
                Ok(provider) => return Ok(provider),
                Err(e) => e,
            };

            if self.failures >= retries {
                error!(path = %self.config.socket_path, error = %err, "Giving up on node socket");
                if retries == 0 {
                    return Err(err);
                }
                return Err(IpcError::AttemptsExhausted {
                    attempts: self.failures + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff.delay(self.failures);
            self.failures += 1;
            warn!(
                attempt = self.failures,
                of = retries + 1,
                error = %err,
                retry_in = ?delay,
                "Node socket not ready"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Backoff tests ====================

    #[test]
    fn test_backoff_doubles_from_initial() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..4).map(|n| backoff.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff {
            initial_ms: 250,
            max_ms: 1_500,
        };
        assert_eq!(backoff.delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(1_500));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1_500));
    }

    #[test]
    fn test_config_for_path_uses_defaults() {
        let config = IpcConfig::with_path("/run/reth/reth.ipc");
        assert_eq!(config.socket_path, "/run/reth/reth.ipc");
        assert_eq!(config.connect_retries, 0);
        assert_eq!(config.backoff, Backoff::default());
        assert_eq!(config.timeout_ms, CONNECTION_TIMEOUT_MS);
    }

    // ==================== Path tests ====================

    #[test]
    fn test_home_prefix_is_expanded() {
        let expanded = expand_path("~/.ethereum/geth.ipc");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("geth.ipc"));
    }

    #[test]
    fn test_only_leading_tilde_is_expanded() {
        assert_eq!(expand_path("/data/~node/geth.ipc"), "/data/~node/geth.ipc");
        assert_eq!(expand_path("~geth.ipc"), "~geth.ipc");
    }

    #[test]
    fn test_default_path_is_expanded_socket() {
        let path = default_ipc_path();
        assert!(path.ends_with(".ipc"));
        assert!(!path.starts_with('~'));
    }

    #[test]
    fn test_geth_location_is_probed_first() {
        assert_eq!(KNOWN_IPC_PATHS.first(), Some(&DEFAULT_IPC_PATH));
    }

    #[test]
    fn test_blank_path_is_rejected() {
        assert!(matches!(validate_ipc_path(""), Err(IpcError::InvalidPath(_))));
        assert!(matches!(validate_ipc_path(" \t"), Err(IpcError::InvalidPath(_))));
    }

    #[test]
    fn test_path_without_ipc_suffix_is_accepted() {
        assert!(validate_ipc_path("/run/reth/socket").is_ok());
        assert!(validate_ipc_path("~/.ethereum/geth.ipc").is_ok());
    }

    #[test]
    fn test_existing_file_counts_as_socket() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(socket_exists(&file.path().display().to_string()));
        assert!(!socket_exists("/definitely/not/here/geth.ipc"));
    }

    // ==================== Connection tests ====================

    #[tokio::test]
    async fn test_missing_socket_fails_before_handshake() {
        let mut conn = IpcConnection::with_path("/definitely/not/here/geth.ipc");
        let result = conn.connect().await;
        assert!(matches!(result, Err(IpcError::SocketNotFound(p)) if p.ends_with("geth.ipc")));
        assert_eq!(conn.socket_path(), "/definitely/not/here/geth.ipc");
    }

    #[tokio::test]
    async fn test_no_retries_surfaces_first_error() {
        let mut conn = IpcConnection::with_path("/definitely/not/here/geth.ipc");
        let result = conn.connect_with_retries().await;
        assert!(matches!(result, Err(IpcError::SocketNotFound(_))));
        assert_eq!(conn.attempts(), 0);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mut conn = IpcConnection::new(IpcConfig {
            connect_retries: 2,
            backoff: Backoff {
                initial_ms: 1,
                max_ms: 2,
            },
            ..IpcConfig::with_path("/definitely/not/here/geth.ipc")
        });

        match conn.connect_with_retries().await {
            Err(IpcError::AttemptsExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, IpcError::SocketNotFound(_)));
            }
            other => panic!("expected AttemptsExhausted, got {:?}", other.err()),
        }
        assert_eq!(conn.attempts(), 2);
    }

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = IpcError::SocketNotFound("/tmp/geth.ipc".to_owned());
        assert_eq!(err.to_string(), "no node socket at /tmp/geth.ipc");

        let err = IpcError::AttemptsExhausted {
            attempts: 4,
            last: Box::new(IpcError::Timeout { limit_ms: 250 }),
        };
        assert_eq!(
            err.to_string(),
            "node socket unreachable after 4 attempts: handshake did not complete within 250ms"
        );
    }
}
