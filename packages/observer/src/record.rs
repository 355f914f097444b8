//! Transaction Records
//!
//! The persisted unit ([`TransactionRecord`]) and the per-block reconciliation
//! tally ([`ReconciliationResult`]). Records are serialized with the field names
//! the search index expects (`timeFirstDiscovered`, `txHash`, `txValue`, ...).

use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::decoder::PendingTransaction;
use crate::filter::{check_eligibility, Eligibility};
use crate::units::wei_to_ether;

/// Name of the collection records are written to
pub const DEFAULT_COLLECTION: &str = "transactions";

/// Field the reconciler matches on
pub const HASH_FIELD: &str = "txHash";

/// Enriched pending transaction as stored in the search index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    /// Unix timestamp in seconds when the transaction was first observed
    #[serde(rename = "timeFirstDiscovered")]
    pub time_first_discovered: i64,
    /// Transaction hash with 0x prefix
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    /// Sender address (checksummed)
    pub from: String,
    /// Recipient address (checksummed)
    pub to: String,
    /// Value in ether
    #[serde(rename = "txValue")]
    pub tx_value: f64,
    /// Calldata, hex without prefix
    pub data: String,
    /// Sender nonce
    pub nonce: u64,
    /// Gas price scaled by 10^18
    #[serde(rename = "gasPrice")]
    pub gas_price: f64,
    /// Gas limit scaled by 10^18
    pub gas: f64,
}

impl TransactionRecord {
    /// Build a record from a decoded pending transaction
    ///
    /// # Arguments
    /// * `tx` - The decoded transaction with its recovered sender
    /// * `discovered_at` - Unix seconds when the hash was first seen
    ///
    /// # Returns
    /// The record for a contract interaction, otherwise the verdict that ruled it out
    pub fn from_pending(tx: &PendingTransaction, discovered_at: i64) -> Result<Self, Eligibility> {
        let verdict = check_eligibility(&tx.input, tx.to.as_ref());
        let (Eligibility::Eligible, Some(to)) = (verdict, tx.to) else {
            return Err(verdict);
        };

        Ok(TransactionRecord {
            time_first_discovered: discovered_at,
            tx_hash: format_hash(tx.hash),
            from: tx.from.to_checksum(None),
            to: to.to_checksum(None),
            tx_value: wei_to_ether(tx.value),
            data: hex::encode(&tx.input),
            nonce: tx.nonce,
            gas_price: wei_to_ether(U256::from(tx.gas_price)),
            gas: wei_to_ether(U256::from(tx.gas_limit)),
        })
    }

    /// Serialize the record to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a record from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Outcome of reconciling one mined block against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconciliationResult {
    /// Block number, when the node reported one
    pub block_number: u64,
    /// Transactions in the block
    pub total: usize,
    /// Transactions that had a stored record which was deleted
    pub found: usize,
    /// Lookups or deletes that failed and were skipped
    pub errors: usize,
    /// Matched transactions whose receipt reports a revert
    pub reverted: usize,
}

impl ReconciliationResult {
    /// Percentage of the block's transactions observed while pending
    ///
    /// An empty block has a coverage of `0.0`.
    pub fn coverage_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.found as f64 / self.total as f64
    }
}

/// Format a transaction hash as hex string with 0x prefix
pub fn format_hash(hash: B256) -> String {
    format!("{:#x}", hash)
}

/// Get current timestamp in seconds
pub fn current_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
