//! The Chain-RPC collaborator interface (spec §6).
//!
//! The attribution engine and the contract registry depend on this trait, not
//! on any concrete transport, so tests can drive them with an in-memory fake
//! instead of a live node.

use thiserror::Error;

use crate::trace::{Transaction, TransactionReceipt, TraceResult};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Transport(String),
    #[error("RPC endpoint returned an error response: {0}")]
    RpcResponse(String),
}

/// External collaborator supplying chain state and the execution trace.
///
/// `get_code` returning `""` or `"0x"` indicates a non-contract account; this is
/// not an error (spec §7 `CodeEmptyAtAddress` is a warn-level condition, not a
/// transport failure).
pub trait ChainClient {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError>;
    async fn get_transaction(&self, tx_hash: &str) -> Result<Transaction, ChainError>;
    async fn get_code(&self, address: &str) -> Result<String, ChainError>;
    async fn debug_trace_transaction(&self, tx_hash: &str) -> Result<TraceResult, ChainError>;
}
