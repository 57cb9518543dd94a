//! A [`ChainClient`] backed by a JSON-RPC 2.0 endpoint (any node that speaks
//! the standard `eth_*` and `debug_traceTransaction` methods).

use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use solgas_types::chain::{ChainClient, ChainError};
use solgas_types::trace::{TraceResult, Transaction, TransactionReceipt};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("invalid RPC endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

fn request(method: &str, params: Vec<Value>) -> JsonRpcRequest {
    JsonRpcRequest { jsonrpc: "2.0".to_owned(), method: method.to_owned(), params, id: 1 }
}

/// Talks to one RPC endpoint. Holds a pooled [`Client`] so repeated calls
/// reuse connections.
pub struct JsonRpcClient {
    http: Client,
    endpoint: Url,
}

impl JsonRpcClient {
    pub fn new(endpoint: &str) -> Result<Self, RpcClientError> {
        Ok(JsonRpcClient { http: Client::new(), endpoint: Url::parse(endpoint)? })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ChainError> {
        let body = self
            .http
            .post(self.endpoint.clone())
            .json(&request(method, params))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .json::<Value>()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(ChainError::RpcResponse(error.to_string()));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ChainError::RpcResponse("response had neither result nor error".to_string()))
    }
}

/// Wire shape of `eth_getTransactionReceipt`'s result: `gasUsed` is a
/// quantity-encoded hex string on the wire, unlike the plain integers geth's
/// struct-logger uses for trace steps.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceiptWire {
    gas_used: String,
    contract_address: Option<String>,
}

fn parse_quantity(hex: &str) -> Result<i64, ChainError> {
    let stripped = hex.strip_prefix("0x").unwrap_or(hex);
    i64::from_str_radix(stripped, 16).map_err(|e| ChainError::RpcResponse(format!("not a quantity ({hex}): {e}")))
}

impl ChainClient for JsonRpcClient {
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError> {
        let result = self.call("eth_getTransactionReceipt", vec![json!(tx_hash)]).await?;
        let wire: TransactionReceiptWire =
            serde_json::from_value(result).map_err(|e| ChainError::RpcResponse(e.to_string()))?;
        Ok(TransactionReceipt { gas_used: parse_quantity(&wire.gas_used)?, contract_address: wire.contract_address })
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Transaction, ChainError> {
        let result = self.call("eth_getTransactionByHash", vec![json!(tx_hash)]).await?;
        serde_json::from_value(result).map_err(|e| ChainError::RpcResponse(e.to_string()))
    }

    async fn get_code(&self, address: &str) -> Result<String, ChainError> {
        let result = self.call("eth_getCode", vec![json!(format!("0x{address}")), json!("latest")]).await?;
        result.as_str().map(str::to_owned).ok_or_else(|| ChainError::RpcResponse("eth_getCode result was not a string".to_string()))
    }

    async fn debug_trace_transaction(&self, tx_hash: &str) -> Result<TraceResult, ChainError> {
        let tracer_config = json!({"disableStack": false, "disableMemory": true, "disableStorage": true});
        let result = self.call("debug_traceTransaction", vec![json!(tx_hash), tracer_config]).await?;
        serde_json::from_value(result).map_err(|e| ChainError::RpcResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantity() {
        assert_eq!(parse_quantity("0x5208").unwrap(), 21000);
        assert_eq!(parse_quantity("5208").unwrap(), 21000);
    }

    #[test]
    fn rejects_non_hex_quantity() {
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn request_envelope_has_jsonrpc_2_0() {
        let req = request("eth_getCode", vec![json!("0xabc"), json!("latest")]);
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.method, "eth_getCode");
    }
}
