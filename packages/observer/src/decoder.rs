//! Transaction Decoder
//!
//! Turns a transaction fetched from the node into a [`PendingTransaction`]:
//! the sender is recovered from the signature under the node's chain id and the
//! fields needed for enrichment are pulled out of the typed envelope.
//! Supports legacy (type 0), EIP-2930 (type 1), EIP-1559 (type 2), EIP-4844
//! (type 3) and EIP-7702 (type 4) transactions. Envelope types added to alloy
//! later surface as [`DecodeError::UnsupportedTxType`].

use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::Transaction;
use thiserror::Error;

/// Errors that can occur during transaction decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Transaction signed for chain {found}, node is on chain {expected}")]
    ChainIdMismatch { expected: u64, found: u64 },

    #[error("Failed to recover sender: {0}")]
    SignatureRecovery(String),

    #[error("Unsupported transaction type: {0}")]
    UnsupportedTxType(u8),
}

/// Pending transaction with the sender recovered
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Sender address recovered from the signature
    pub from: Address,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Transaction value in wei
    pub value: U256,
    /// Gas price (for legacy/EIP-2930) or max fee per gas (for EIP-1559 and later)
    pub gas_price: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Transaction input data (calldata)
    pub input: Bytes,
    /// Transaction nonce
    pub nonce: u64,
}

/// Fields shared by every supported envelope
struct TxFields {
    input: Bytes,
    to: Option<Address>,
    value: U256,
    gas_price: u128,
    nonce: u64,
    gas_limit: u64,
}

/// Extract transaction fields from a TxEnvelope
fn extract_tx_fields(tx_envelope: &TxEnvelope) -> Result<TxFields, DecodeError> {
    let fields = match tx_envelope {
        TxEnvelope::Legacy(signed) => {
            let tx = signed.tx();
            TxFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                gas_price: tx.gas_price,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
            }
        }
        TxEnvelope::Eip2930(signed) => {
            let tx = signed.tx();
            TxFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                gas_price: tx.gas_price,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
            }
        }
        TxEnvelope::Eip1559(signed) => {
            let tx = signed.tx();
            TxFields {
                input: tx.input.clone(),
                to: tx.to.to().copied(),
                value: tx.value,
                gas_price: tx.max_fee_per_gas,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
            }
        }
        TxEnvelope::Eip4844(signed) => {
            let tx = signed.tx().tx();
            TxFields {
                input: tx.input.clone(),
                to: Some(tx.to),
                value: tx.value,
                gas_price: tx.max_fee_per_gas,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
            }
        }
        TxEnvelope::Eip7702(signed) => {
            let tx = signed.tx();
            TxFields {
                input: tx.input.clone(),
                to: Some(tx.to),
                value: tx.value,
                gas_price: tx.max_fee_per_gas,
                nonce: tx.nonce,
                gas_limit: tx.gas_limit,
            }
        }
        other => return Err(DecodeError::UnsupportedTxType(other.tx_type() as u8)),
    };
    Ok(fields)
}

/// Recover the sender of a signed envelope under the given chain id
///
/// Replay-protected transactions must carry the node's chain id. Legacy
/// transactions signed before EIP-155 have no chain id and are accepted as-is.
pub fn recover_sender(tx_envelope: &TxEnvelope, chain_id: u64) -> Result<Address, DecodeError> {
    if let Some(found) = tx_envelope.chain_id() {
        if found != chain_id {
            return Err(DecodeError::ChainIdMismatch { expected: chain_id, found });
        }
    }

    tx_envelope
        .recover_signer()
        .map_err(|e| DecodeError::SignatureRecovery(e.to_string()))
}

/// Decode a signed envelope into a [`PendingTransaction`]
///
/// # Arguments
/// * `tx_envelope` - The signed transaction
/// * `chain_id` - The node's chain id, used to validate the signature scheme
pub fn decode_envelope(tx_envelope: &TxEnvelope, chain_id: u64) -> Result<PendingTransaction, DecodeError> {
    let fields = extract_tx_fields(tx_envelope)?;
    let from = recover_sender(tx_envelope, chain_id)?;

    Ok(PendingTransaction {
        hash: *tx_envelope.tx_hash(),
        from,
        to: fields.to,
        value: fields.value,
        gas_price: fields.gas_price,
        gas_limit: fields.gas_limit,
        input: fields.input,
        nonce: fields.nonce,
    })
}

/// Decode a transaction returned by the node
pub fn decode_transaction(tx: &Transaction, chain_id: u64) -> Result<PendingTransaction, DecodeError> {
    decode_envelope(&tx.inner, chain_id)
}

/// Whether a transaction returned by the node is still waiting for inclusion
pub fn is_pending(tx: &Transaction) -> bool {
    tx.block_hash.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::{SignableTransaction, TxEip1559, TxEip7702, TxLegacy};
    use alloy::network::TxSignerSync;
    use alloy::primitives::{address, TxKind};
    use alloy::signers::local::PrivateKeySigner;

    /// First anvil development account
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");

    fn dev_signer() -> PrivateKeySigner {
        DEV_KEY.parse().unwrap()
    }

    fn signed_legacy(chain_id: Option<u64>, to: TxKind, input: Vec<u8>) -> TxEnvelope {
        let mut tx = TxLegacy {
            chain_id,
            nonce: 7,
            gas_price: 20_000_000_000,
            gas_limit: 90_000,
            to,
            value: U256::from(2_000_000_000_000_000_000u128),
            input: Bytes::from(input),
        };
        let signature = dev_signer().sign_transaction_sync(&mut tx).unwrap();
        TxEnvelope::Legacy(tx.into_signed(signature))
    }

    fn signed_eip1559(chain_id: u64) -> TxEnvelope {
        let mut tx = TxEip1559 {
            chain_id,
            nonce: 3,
            gas_limit: 120_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
            to: TxKind::Call(ROUTER),
            value: U256::ZERO,
            input: Bytes::from(vec![0x38, 0xed, 0x17, 0x39, 0x00]),
            ..Default::default()
        };
        let signature = dev_signer().sign_transaction_sync(&mut tx).unwrap();
        TxEnvelope::Eip1559(tx.into_signed(signature))
    }

    fn signed_eip7702(chain_id: u64) -> TxEnvelope {
        let mut tx = TxEip7702 {
            chain_id,
            nonce: 11,
            gas_limit: 150_000,
            max_fee_per_gas: 25_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            to: ROUTER,
            value: U256::from(1_000u64),
            input: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x01]),
            ..Default::default()
        };
        let signature = dev_signer().sign_transaction_sync(&mut tx).unwrap();
        TxEnvelope::Eip7702(tx.into_signed(signature))
    }

    // ==================== recover_sender tests ====================

    #[test]
    fn test_recover_sender_legacy_eip155() {
        let envelope = signed_legacy(Some(1), TxKind::Call(ROUTER), vec![0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(recover_sender(&envelope, 1).unwrap(), DEV_ADDRESS);
    }

    #[test]
    fn test_recover_sender_pre_eip155_accepts_any_chain() {
        let envelope = signed_legacy(None, TxKind::Call(ROUTER), vec![]);
        assert_eq!(recover_sender(&envelope, 31337).unwrap(), DEV_ADDRESS);
    }

    #[test]
    fn test_recover_sender_rejects_foreign_chain() {
        let envelope = signed_eip1559(5);
        let result = recover_sender(&envelope, 1);
        assert!(matches!(
            result,
            Err(DecodeError::ChainIdMismatch { expected: 1, found: 5 })
        ));
    }

    // ==================== decode_envelope tests ====================

    #[test]
    fn test_decode_legacy_fields() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb, 0x01, 0x02];
        let envelope = signed_legacy(Some(1), TxKind::Call(ROUTER), input.clone());
        let decoded = decode_envelope(&envelope, 1).unwrap();

        assert_eq!(decoded.hash, *envelope.tx_hash());
        assert_eq!(decoded.from, DEV_ADDRESS);
        assert_eq!(decoded.to, Some(ROUTER));
        assert_eq!(decoded.value, U256::from(2_000_000_000_000_000_000u128));
        assert_eq!(decoded.gas_price, 20_000_000_000);
        assert_eq!(decoded.gas_limit, 90_000);
        assert_eq!(decoded.nonce, 7);
        assert_eq!(decoded.input, Bytes::from(input));
    }

    #[test]
    fn test_decode_contract_creation_has_no_recipient() {
        let envelope = signed_legacy(Some(1), TxKind::Create, vec![0x60, 0x80, 0x60, 0x40]);
        let decoded = decode_envelope(&envelope, 1).unwrap();
        assert_eq!(decoded.to, None);
    }

    #[test]
    fn test_decode_eip1559_uses_max_fee() {
        let decoded = decode_envelope(&signed_eip1559(1), 1).unwrap();
        assert_eq!(decoded.gas_price, 30_000_000_000);
        assert_eq!(decoded.nonce, 3);
        assert_eq!(decoded.from, DEV_ADDRESS);
    }

    #[test]
    fn test_decode_eip7702_contract_call() {
        let envelope = signed_eip7702(1);
        let decoded = decode_envelope(&envelope, 1).unwrap();

        assert_eq!(decoded.hash, *envelope.tx_hash());
        assert_eq!(decoded.from, DEV_ADDRESS);
        assert_eq!(decoded.to, Some(ROUTER));
        assert_eq!(decoded.value, U256::from(1_000u64));
        assert_eq!(decoded.gas_price, 25_000_000_000);
        assert_eq!(decoded.gas_limit, 150_000);
        assert_eq!(decoded.nonce, 11);
        assert_eq!(decoded.input.len(), 6);
    }

    #[test]
    fn test_decode_eip7702_checks_chain_id() {
        let result = decode_envelope(&signed_eip7702(10), 1);
        assert!(matches!(
            result,
            Err(DecodeError::ChainIdMismatch { expected: 1, found: 10 })
        ));
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::ChainIdMismatch { expected: 1, found: 5 };
        assert!(err.to_string().contains("chain 5"));

        let err = DecodeError::UnsupportedTxType(4);
        assert!(err.to_string().contains('4'));
    }
}
