//! Ledger module - product provenance lookups against the registry contract.
//!
//! - **Traits**: [`LedgerService`] for lookup and registration
//! - **ABI**: call encoding and return decoding in [`abi`]
//! - **RPC**: [`ContractLedger`] over JSON-RPC, strategy resolution via [`LedgerConnector`]
//! - **Memory**: [`MemoryLedger`] with the same append-only rules, for tests and offline runs

pub mod abi;
pub mod memory;
pub mod rpc;
pub mod traits;

pub use memory::MemoryLedger;
pub use rpc::{ContractLedger, JsonRpcClient, LedgerConnector};
pub use traits::{AbiError, ConnectionStrategy, LedgerError, LedgerService, TxReceipt};
