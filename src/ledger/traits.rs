//! Core traits and types for talking to the product registry contract.
//!
//! - Lookup and registration via [`LedgerService`]
//! - Connection strategy via [`ConnectionStrategy`]
//! - Standardized error handling via [`LedgerError`]

use crate::model::ProductRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Ledger Trait
// ============================================================================

/// Product registry backed by a smart contract.
///
/// The contract exposes two entry points:
///
/// ```text
/// verifyProduct(string qrCodeId) view returns (string, string, string, bool)
/// registerProduct(string qrCodeId, string name, string manufacturer, string batch)
/// ```
///
/// Records are append-only: once `registerProduct` has been confirmed for an
/// id, later calls for the same id revert. That rule is enforced by the
/// contract, not by implementations of this trait.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator holds them behind
/// an `Arc` and may outlive the task that created them.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Looks up `qr_code_id` exactly as decoded. No trimming or case folding.
    ///
    /// An id the contract has never seen is not an error: the contract returns
    /// an empty record with `is_authentic == false`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the node is unreachable, the call reverts,
    /// or the return data cannot be decoded.
    async fn verify_product(&self, qr_code_id: &str) -> Result<ProductRecord, LedgerError>;

    /// Submits a registration transaction and waits for its receipt.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WalletUnavailable`] immediately when no signing
    /// wallet is connected, [`LedgerError::Reverted`] when the transaction is
    /// mined with a failure status, and [`LedgerError::Rpc`] when the wallet
    /// or node rejects it before mining.
    async fn register_product(
        &self,
        qr_code_id: &str,
        product_name: &str,
        manufacturer: &str,
        batch_number: &str,
    ) -> Result<TxReceipt, LedgerError>;

    /// Strategy this service resolved when it was connected.
    fn strategy(&self) -> &ConnectionStrategy;
}

// ============================================================================
// Types
// ============================================================================

/// How a session reaches the ledger. Resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionStrategy {
    /// A wallet endpoint managing `account`; used for reads and writes.
    SigningWallet { account: String },

    /// Public read-only node. Registration is unavailable.
    PublicRpc,
}

impl ConnectionStrategy {
    pub fn can_sign(&self) -> bool {
        matches!(self, ConnectionStrategy::SigningWallet { .. })
    }
}

/// Confirmation of a mined registration transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash (`0x`-prefixed hex)
    pub tx_hash: String,

    /// Block the transaction was included in, when the node reports it
    pub block_number: Option<u64>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while reading from or writing to the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// HTTP transport failure (DNS, connection refused, TLS, ...)
    #[error("Ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        revert_reason: Option<String>,
    },

    /// Transaction was mined but reverted
    #[error("Transaction reverted{}", reason_suffix(.reason))]
    Reverted {
        reason: Option<String>,
        tx_hash: Option<String>,
    },

    /// Registration requested without a signing wallet
    #[error("A signing wallet is required to register products")]
    WalletUnavailable,

    /// Call or return data did not follow the contract ABI
    #[error("ABI error: {0}")]
    Abi(#[from] AbiError),

    /// Response shape was not valid JSON-RPC
    #[error("Malformed RPC response: {0}")]
    Malformed(String),

    /// Ledger could not be reached for a reason other than transport
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}

impl LedgerError {
    /// Human-readable rejection reason from the contract, if one was given.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            LedgerError::Rpc { revert_reason, .. } => revert_reason.as_deref(),
            LedgerError::Reverted { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

/// Errors raised while encoding calls or decoding return data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// Return data ended before a word could be read
    #[error("Return data truncated at offset {0}")]
    Truncated(usize),

    /// Offset or length word does not fit in `usize`
    #[error("Word at offset {0} is out of range")]
    OutOfRange(usize),

    /// String payload was not UTF-8
    #[error("Invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    /// Hex payload could not be parsed
    #[error("Invalid hex data: {0}")]
    InvalidHex(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_only_for_contract_errors() {
        let reverted = LedgerError::Reverted {
            reason: Some("Product already registered".into()),
            tx_hash: None,
        };
        assert_eq!(reverted.rejection_reason(), Some("Product already registered"));
        assert_eq!(
            reverted.to_string(),
            "Transaction reverted: Product already registered"
        );

        assert_eq!(LedgerError::WalletUnavailable.rejection_reason(), None);
    }

    #[test]
    fn test_strategy_serialization() {
        let strategy = ConnectionStrategy::SigningWallet {
            account: "0xabc".into(),
        };
        let json = serde_json::to_value(&strategy).unwrap();
        assert_eq!(json["kind"], "signing_wallet");
        assert!(strategy.can_sign());
        assert!(!ConnectionStrategy::PublicRpc.can_sign());
    }
}
