//! Wire types for the `debug_traceTransaction` result and the two lookups
//! (`eth_getTransaction`, `eth_getTransactionReceipt`) the engine needs before
//! it can start walking the trace.

use serde::{Deserialize, Serialize};

/// One entry of `result.structLogs`.
///
/// `gas`/`gasCost` are plain (possibly negative, per the RETURN/REVERT/STOP
/// quirk in spec §4.7) integers, as geth's default struct-logger emits them —
/// not the hex-string encoding used by EIP-3155 tracers.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    pub pc: u64,
    pub op: String,
    pub gas: i64,
    pub gas_cost: i64,
    pub depth: u64,
    /// Bottom-to-top; the top of the stack is the last element.
    pub stack: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    pub struct_logs: Vec<StructLog>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub gas_used: i64,
    pub contract_address: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub to: Option<String>,
}
