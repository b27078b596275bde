//! In-process registry with the same append-only rules as the contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{ConnectionStrategy, LedgerError, LedgerService, TxReceipt};
use crate::model::ProductRecord;

pub struct MemoryLedger {
    products: RwLock<HashMap<String, ProductRecord>>,
    strategy: ConnectionStrategy,
    offline: AtomicBool,
    latency: Option<Duration>,
    next_block: AtomicU64,
}

impl MemoryLedger {
    /// Ledger with a signing wallet attached.
    pub fn new() -> Self {
        Self::with_strategy(ConnectionStrategy::SigningWallet {
            account: "0x0000000000000000000000000000000000000001".to_string(),
        })
    }

    /// Ledger reachable only for reads.
    pub fn read_only() -> Self {
        Self::with_strategy(ConnectionStrategy::PublicRpc)
    }

    fn with_strategy(strategy: ConnectionStrategy) -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
            strategy,
            offline: AtomicBool::new(false),
            latency: None,
            next_block: AtomicU64::new(1),
        }
    }

    /// Delays every call, for exercising timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seeds a record as if it had been registered earlier.
    pub async fn seed(&self, qr_code_id: &str, product_name: &str, manufacturer: &str, batch_number: &str) {
        self.products.write().await.insert(
            qr_code_id.to_string(),
            ProductRecord {
                qr_code_id: qr_code_id.to_string(),
                product_name: product_name.to_string(),
                manufacturer: manufacturer.to_string(),
                batch_number: batch_number.to_string(),
                is_authentic: true,
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    async fn simulate_network(&self) -> Result<(), LedgerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("node offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn verify_product(&self, qr_code_id: &str) -> Result<ProductRecord, LedgerError> {
        self.simulate_network().await?;

        let products = self.products.read().await;
        Ok(products.get(qr_code_id).cloned().unwrap_or(ProductRecord {
            qr_code_id: qr_code_id.to_string(),
            product_name: String::new(),
            manufacturer: String::new(),
            batch_number: String::new(),
            is_authentic: false,
        }))
    }

    async fn register_product(
        &self,
        qr_code_id: &str,
        product_name: &str,
        manufacturer: &str,
        batch_number: &str,
    ) -> Result<TxReceipt, LedgerError> {
        if !self.strategy.can_sign() {
            return Err(LedgerError::WalletUnavailable);
        }
        self.simulate_network().await?;

        let mut products = self.products.write().await;
        if products.contains_key(qr_code_id) {
            return Err(LedgerError::Reverted {
                reason: Some("Product already registered".to_string()),
                tx_hash: None,
            });
        }

        products.insert(
            qr_code_id.to_string(),
            ProductRecord {
                qr_code_id: qr_code_id.to_string(),
                product_name: product_name.to_string(),
                manufacturer: manufacturer.to_string(),
                batch_number: batch_number.to_string(),
                is_authentic: true,
            },
        );

        let block = self.next_block.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_hash: format!("0x{:064x}", block),
            block_number: Some(block),
        })
    }

    fn strategy(&self) -> &ConnectionStrategy {
        &self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_append_only() {
        let ledger = MemoryLedger::new();
        ledger
            .register_product("GLS-1234", "GreenLife Seeds", "GreenLife Ltd", "B-001")
            .await
            .unwrap();

        let err = ledger
            .register_product("GLS-1234", "Counterfeit", "Someone", "X")
            .await
            .unwrap_err();
        assert_eq!(err.rejection_reason(), Some("Product already registered"));

        let product = ledger.verify_product("GLS-1234").await.unwrap();
        assert_eq!(product.product_name, "GreenLife Seeds");
    }

    #[tokio::test]
    async fn test_lookup_is_verbatim() {
        let ledger = MemoryLedger::new();
        ledger.seed("GLS-1234", "GreenLife Seeds", "GreenLife Ltd", "B-001").await;

        assert!(ledger.verify_product("GLS-1234").await.unwrap().is_authentic);
        assert!(!ledger.verify_product("gls-1234").await.unwrap().is_authentic);
        assert!(!ledger.verify_product(" GLS-1234").await.unwrap().is_authentic);
    }

    #[tokio::test]
    async fn test_read_only_rejects_registration_before_network() {
        let ledger = MemoryLedger::read_only();
        ledger.set_offline(true);
        let err = ledger
            .register_product("A", "B", "C", "D")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletUnavailable));
    }
}
