//! JSON-RPC access to the registry contract.
//!
//! [`LedgerConnector`] resolves the [`ConnectionStrategy`] once, by asking the
//! configured wallet endpoint for its accounts. The resulting
//! [`ContractLedger`] then uses that endpoint for every call:
//!
//! - `eth_call` for `verifyProduct`
//! - `eth_sendTransaction` + `eth_getTransactionReceipt` for `registerProduct`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::abi;
use super::traits::{ConnectionStrategy, LedgerError, LedgerService, TxReceipt};
use crate::model::ProductRecord;

// ============================================================================
// JSON-RPC transport
// ============================================================================

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn into_error(self) -> LedgerError {
        let revert_reason = self
            .data
            .as_ref()
            .and_then(|d| d.as_str().or_else(|| d.get("data").and_then(Value::as_str)))
            .and_then(|hex| abi::from_hex(hex).ok())
            .and_then(|bytes| abi::decode_revert_reason(&bytes))
            .or_else(|| {
                self.message
                    .strip_prefix("execution reverted: ")
                    .map(str::to_string)
            });

        LedgerError::Rpc {
            code: self.code,
            message: self.message,
            revert_reason,
        }
    }
}

/// Ethereum JSON-RPC 2.0 client over HTTP.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method, url = %self.url, "JSON-RPC call");
        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(error.into_error());
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::Malformed(format!("{}: {}", method, e)))
    }
}

// ============================================================================
// Contract client
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Registry contract reached through a single JSON-RPC endpoint.
#[derive(Debug)]
pub struct ContractLedger {
    rpc: JsonRpcClient,
    contract_address: String,
    strategy: ConnectionStrategy,
    receipt_poll: Duration,
}

impl ContractLedger {
    pub fn new(
        rpc: JsonRpcClient,
        contract_address: impl Into<String>,
        strategy: ConnectionStrategy,
    ) -> Self {
        Self {
            rpc,
            contract_address: contract_address.into(),
            strategy,
            receipt_poll: Duration::from_secs(1),
        }
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, LedgerError> {
        loop {
            let receipt: Option<RpcReceipt> = self
                .rpc
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            let Some(receipt) = receipt else {
                debug!(tx_hash, "Receipt not yet available");
                tokio::time::sleep(self.receipt_poll).await;
                continue;
            };

            if receipt.status.as_deref() == Some("0x0") {
                return Err(LedgerError::Reverted {
                    reason: None,
                    tx_hash: Some(receipt.transaction_hash),
                });
            }

            let block_number = receipt
                .block_number
                .as_deref()
                .and_then(|n| u64::from_str_radix(n.trim_start_matches("0x"), 16).ok());

            return Ok(TxReceipt {
                tx_hash: receipt.transaction_hash,
                block_number,
            });
        }
    }
}

#[async_trait]
impl LedgerService for ContractLedger {
    #[instrument(skip(self), fields(contract = %self.contract_address))]
    async fn verify_product(&self, qr_code_id: &str) -> Result<ProductRecord, LedgerError> {
        let data = abi::encode_call(abi::VERIFY_PRODUCT, &[qr_code_id]);
        let mut call = json!({ "to": self.contract_address, "data": abi::to_hex(&data) });
        if let ConnectionStrategy::SigningWallet { account } = &self.strategy {
            call["from"] = json!(account);
        }

        let raw: String = self.rpc.call("eth_call", json!([call, "latest"])).await?;
        let tuple = abi::decode_product_tuple(&abi::from_hex(&raw)?)?;

        Ok(ProductRecord {
            qr_code_id: qr_code_id.to_string(),
            product_name: tuple.product_name,
            manufacturer: tuple.manufacturer,
            batch_number: tuple.batch_number,
            is_authentic: tuple.is_authentic,
        })
    }

    #[instrument(skip(self, product_name, manufacturer, batch_number))]
    async fn register_product(
        &self,
        qr_code_id: &str,
        product_name: &str,
        manufacturer: &str,
        batch_number: &str,
    ) -> Result<TxReceipt, LedgerError> {
        let ConnectionStrategy::SigningWallet { account } = &self.strategy else {
            return Err(LedgerError::WalletUnavailable);
        };

        let data = abi::encode_call(
            abi::REGISTER_PRODUCT,
            &[qr_code_id, product_name, manufacturer, batch_number],
        );
        let tx = json!({
            "from": account,
            "to": self.contract_address,
            "data": abi::to_hex(&data),
        });

        info!("Sending registration transaction");
        let tx_hash: String = self.rpc.call("eth_sendTransaction", json!([tx])).await?;
        let receipt = self.wait_for_receipt(&tx_hash).await?;

        info!(tx_hash = %receipt.tx_hash, block = ?receipt.block_number, "Registration confirmed");
        Ok(receipt)
    }

    fn strategy(&self) -> &ConnectionStrategy {
        &self.strategy
    }
}

// ============================================================================
// Strategy resolution
// ============================================================================

/// Resolves how a session reaches the ledger.
#[derive(Debug, Clone)]
pub struct LedgerConnector {
    http: reqwest::Client,
    contract_address: String,
    public_rpc_url: String,
    wallet_rpc_url: Option<String>,
    receipt_poll: Duration,
}

impl LedgerConnector {
    pub fn new(
        http: reqwest::Client,
        contract_address: impl Into<String>,
        public_rpc_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            contract_address: contract_address.into(),
            public_rpc_url: public_rpc_url.into(),
            wallet_rpc_url: None,
            receipt_poll: Duration::from_secs(1),
        }
    }

    pub fn with_wallet(mut self, wallet_rpc_url: Option<String>) -> Self {
        self.wallet_rpc_url = wallet_rpc_url;
        self
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    /// Capability check: a wallet counts as present only if it reports at
    /// least one account. Anything else falls back to the public node.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> ContractLedger {
        if let Some(wallet_url) = &self.wallet_rpc_url {
            let wallet = JsonRpcClient::new(self.http.clone(), wallet_url.clone());
            match wallet.call::<Vec<String>>("eth_accounts", json!([])).await {
                Ok(accounts) => {
                    if let Some(account) = accounts.into_iter().next() {
                        info!(%account, "Using signing wallet");
                        return self.build(wallet, ConnectionStrategy::SigningWallet { account });
                    }
                    warn!("Wallet reported no accounts, falling back to public RPC");
                }
                Err(e) => warn!(error = %e, "Wallet unavailable, falling back to public RPC"),
            }
        }

        info!(url = %self.public_rpc_url, "Using public read-only RPC");
        let public = JsonRpcClient::new(self.http.clone(), self.public_rpc_url.clone());
        self.build(public, ConnectionStrategy::PublicRpc)
    }

    fn build(&self, rpc: JsonRpcClient, strategy: ConnectionStrategy) -> ContractLedger {
        ContractLedger::new(rpc, self.contract_address.clone(), strategy)
            .with_receipt_poll(self.receipt_poll)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::abi::{encode_product_tuple, ProductTuple};
    use axum::{extract::State, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    const CONTRACT: &str = "0x00000000000000000000000000000000000000c0";

    // Mock node: a registry keyed by the raw eth_call data, plus a receipt
    // that only shows up on the second poll.
    #[derive(Default)]
    struct MockNode {
        accounts: Vec<String>,
        products: Mutex<HashMap<String, ProductTuple>>,
        receipt_polls: Mutex<u32>,
        revert_next_tx: bool,
    }

    async fn handle(State(node): State<Arc<MockNode>>, Json(req): Json<Value>) -> Json<Value> {
        let id = req["id"].clone();
        let params = &req["params"];
        let result = match req["method"].as_str().unwrap_or_default() {
            "eth_accounts" => json!(node.accounts),
            "eth_call" => {
                let data = params[0]["data"].as_str().unwrap_or_default().to_string();
                let tuple = node
                    .products
                    .lock()
                    .unwrap()
                    .get(&data)
                    .cloned()
                    .unwrap_or(ProductTuple {
                        product_name: String::new(),
                        manufacturer: String::new(),
                        batch_number: String::new(),
                        is_authentic: false,
                    });
                json!(abi::to_hex(&encode_product_tuple(&tuple)))
            }
            "eth_sendTransaction" => {
                if node.revert_next_tx {
                    let mut reason = vec![0x08, 0xc3, 0x79, 0xa0];
                    reason.extend(&abi::encode_call("x()", &["Product already registered"])[4..]);
                    return Json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": 3, "message": "execution reverted", "data": abi::to_hex(&reason) }
                    }));
                }
                json!("0xfeed")
            }
            "eth_getTransactionReceipt" => {
                let mut polls = node.receipt_polls.lock().unwrap();
                *polls += 1;
                if *polls < 2 {
                    Value::Null
                } else {
                    json!({ "transactionHash": "0xfeed", "blockNumber": "0x1b4", "status": "0x1" })
                }
            }
            _ => Value::Null,
        };
        Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    async fn spawn_node(node: Arc<MockNode>) -> String {
        let app = Router::new().route("/", post(handle)).with_state(node);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn call_data(code: &str) -> String {
        abi::to_hex(&abi::encode_call(abi::VERIFY_PRODUCT, &[code]))
    }

    #[tokio::test]
    async fn test_verify_registered_product_over_public_rpc() {
        let node = Arc::new(MockNode::default());
        node.products.lock().unwrap().insert(
            call_data("GLS-1234"),
            ProductTuple {
                product_name: "GreenLife Seeds".into(),
                manufacturer: "GreenLife Ltd".into(),
                batch_number: "B-001".into(),
                is_authentic: true,
            },
        );
        let url = spawn_node(node).await;

        let ledger = LedgerConnector::new(reqwest::Client::new(), CONTRACT, url)
            .connect()
            .await;
        assert_eq!(ledger.strategy(), &ConnectionStrategy::PublicRpc);

        let product = ledger.verify_product("GLS-1234").await.unwrap();
        assert_eq!(product.qr_code_id, "GLS-1234");
        assert_eq!(product.product_name, "GreenLife Seeds");
        assert_eq!(product.manufacturer, "GreenLife Ltd");
        assert_eq!(product.batch_number, "B-001");
        assert!(product.is_authentic);

        let unknown = ledger.verify_product("UNKNOWN-999").await.unwrap();
        assert!(!unknown.is_authentic);
    }

    #[tokio::test]
    async fn test_public_rpc_cannot_register() {
        let url = spawn_node(Arc::new(MockNode::default())).await;
        let ledger = LedgerConnector::new(reqwest::Client::new(), CONTRACT, url)
            .connect()
            .await;

        let err = ledger
            .register_product("UNKNOWN-999", "Test Product", "Acme", "BATCH-001")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::WalletUnavailable));
    }

    #[tokio::test]
    async fn test_wallet_without_accounts_falls_back() {
        let wallet = spawn_node(Arc::new(MockNode::default())).await;
        let public = spawn_node(Arc::new(MockNode::default())).await;

        let ledger = LedgerConnector::new(reqwest::Client::new(), CONTRACT, public)
            .with_wallet(Some(wallet))
            .connect()
            .await;
        assert!(!ledger.strategy().can_sign());
    }

    #[tokio::test]
    async fn test_register_waits_for_receipt() {
        let node = Arc::new(MockNode {
            accounts: vec!["0x00000000000000000000000000000000000000aa".into()],
            ..Default::default()
        });
        let wallet = spawn_node(node.clone()).await;

        let ledger = LedgerConnector::new(reqwest::Client::new(), CONTRACT, "http://127.0.0.1:9")
            .with_wallet(Some(wallet))
            .with_receipt_poll(Duration::from_millis(10))
            .connect()
            .await;
        assert!(ledger.strategy().can_sign());

        let receipt = ledger
            .register_product("UNKNOWN-999", "Test Product", "Acme", "BATCH-001")
            .await
            .unwrap();
        assert_eq!(receipt.tx_hash, "0xfeed");
        assert_eq!(receipt.block_number, Some(436));
        assert_eq!(*node.receipt_polls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejected_transaction_surfaces_reason() {
        let node = Arc::new(MockNode {
            accounts: vec!["0x00000000000000000000000000000000000000aa".into()],
            revert_next_tx: true,
            ..Default::default()
        });
        let wallet = spawn_node(node).await;

        let ledger = LedgerConnector::new(reqwest::Client::new(), CONTRACT, "http://127.0.0.1:9")
            .with_wallet(Some(wallet))
            .connect()
            .await;

        let err = ledger
            .register_product("GLS-1234", "Dup", "Acme", "B-002")
            .await
            .unwrap_err();
        assert_eq!(err.rejection_reason(), Some("Product already registered"));
    }
}
