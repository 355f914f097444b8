//! Contract-Interaction Filtering
//!
//! Decides which pending transactions are worth recording. Only calls into an
//! existing contract qualify: the payload must carry at least a 4-byte method
//! selector and a recipient must be present. Plain value transfers and contract
//! creations are dropped.

use alloy::primitives::Address;

/// Length of a method selector in bytes
pub const SELECTOR_LEN: usize = 4;

/// Outcome of the eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Contract call with a selector, recorded
    Eligible,
    /// Payload shorter than a selector (value transfer or junk calldata)
    ShortPayload,
    /// No recipient, i.e. a contract deployment
    ContractCreation,
}

impl Eligibility {
    /// Short reason label used in debug logs
    pub fn reason(&self) -> &'static str {
        match self {
            Eligibility::Eligible => "eligible",
            Eligibility::ShortPayload => "payload shorter than selector",
            Eligibility::ContractCreation => "contract creation",
        }
    }
}

/// Check whether a transaction is a contract interaction
///
/// # Arguments
/// * `input` - The transaction input/calldata
/// * `to` - The recipient, `None` for contract creation
pub fn check_eligibility(input: &[u8], to: Option<&Address>) -> Eligibility {
    if input.len() < SELECTOR_LEN {
        return Eligibility::ShortPayload;
    }
    if to.is_none() {
        return Eligibility::ContractCreation;
    }
    Eligibility::Eligible
}
