//! HTTP transport adapter for the chain client.
//!
//! Read paths speak JSON-RPC 2.0 directly to the configured indexer endpoint
//! (one POST per query, single parameter object). The write path (native
//! transfer) goes through an `ethers` signing middleware so nonce management,
//! signing, and receipt polling stay with the library.
#![forbid(unsafe_code)]

use super::{
    BroadcastReceipt, ChainClient, ChainClientError, TransferFilter, TransferRecord, TxLog,
};
use crate::address::EthAddress;
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{TransactionRequest, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Construction parameters for [`HttpChainClient`].
#[derive(Clone)]
pub struct ChainClientConfig {
    /// Remote JSON-RPC/indexer endpoint URL (typically carries an API key).
    pub endpoint: String,
    /// Hex-encoded signing key for the funding account.
    pub signing_key: String,
    pub chain_id: u64,
    /// Expected address of the funding account. Construction fails if the
    /// signing key does not derive to this address.
    pub funding_address: EthAddress,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ChainClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClientConfig")
            .field("endpoint", &self.endpoint)
            .field("signing_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("funding_address", &self.funding_address)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// HTTP client implementing the chain contract.
#[derive(Clone)]
pub struct HttpChainClient {
    endpoint: String,
    http: reqwest::Client,
    signer: Arc<SignerClient>,
}

impl HttpChainClient {
    pub fn new(cfg: &ChainClientConfig) -> Result<Self, ChainClientError> {
        if cfg.endpoint.trim().is_empty() {
            return Err(ChainClientError::Config("endpoint is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| ChainClientError::Config(format!("failed to build http client: {e}")))?;

        let provider = Provider::<Http>::try_from(cfg.endpoint.clone())
            .map_err(|e| ChainClientError::Config(format!("invalid endpoint url: {e}")))?;

        let wallet: LocalWallet = cfg
            .signing_key
            .parse::<LocalWallet>()
            .map_err(|e| ChainClientError::Config(format!("failed to parse signing key: {e}")))?
            .with_chain_id(cfg.chain_id);

        if wallet.address() != cfg.funding_address.h160() {
            return Err(ChainClientError::Config(format!(
                "signing key address {} does not match configured funding address {}",
                EthAddress::from(wallet.address()),
                cfg.funding_address
            )));
        }

        let signer = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            http,
            signer,
        })
    }

    async fn rpc<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, ChainClientError> {
        let value = self.rpc_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| ChainClientError::Decode(e.to_string()))
    }

    /// Raw variant that keeps `result` as a JSON value so callers can treat
    /// an explicit `null` (e.g. unknown receipt) as data, not an error.
    async fn rpc_value<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<serde_json::Value, ChainClientError> {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainClientError::Timeout
                } else {
                    ChainClientError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ChainClientError::HttpStatus(status.as_u16()));
        }

        let envelope: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ChainClientError::Decode(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(ChainClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(envelope.result)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn get_asset_transfers(
        &self,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferRecord>, ChainClientError> {
        let result: RawTransfersResult = self.rpc("alchemy_getAssetTransfers", [filter]).await?;
        Ok(result.transfers.into_iter().map(record_from_raw).collect())
    }

    async fn get_balance(&self, address: &EthAddress) -> Result<U256, ChainClientError> {
        let quantity: String = self
            .rpc("eth_getBalance", (address.as_str(), "latest"))
            .await?;
        parse_quantity(&quantity)
    }

    async fn gas_price(&self) -> Result<U256, ChainClientError> {
        let quantity: String = self.rpc("eth_gasPrice", serde_json::json!([])).await?;
        parse_quantity(&quantity)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<Vec<TxLog>>, ChainClientError> {
        let value = self
            .rpc_value(
                "eth_getTransactionReceipt",
                [format!("0x{:x}", tx_hash)],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt =
            serde_json::from_value(value).map_err(|e| ChainClientError::Decode(e.to_string()))?;
        Ok(Some(logs_from_receipt(raw)?))
    }

    async fn call(&self, to: &EthAddress, calldata: Vec<u8>) -> Result<Vec<u8>, ChainClientError> {
        let params = serde_json::json!([
            { "to": to.as_str(), "data": format!("0x{}", hex::encode(&calldata)) },
            "latest",
        ]);
        let result: String = self.rpc("eth_call", params).await?;
        decode_hex_bytes(&result)
    }

    async fn send_native_transfer(
        &self,
        to: &EthAddress,
        value: U256,
        gas_price: U256,
    ) -> Result<BroadcastReceipt, ChainClientError> {
        let tx = TransactionRequest::new()
            .to(to.h160())
            .value(value)
            .gas_price(gas_price);

        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainClientError::Submit(format!("failed sending transaction: {e}")))?;

        let receipt = pending
            .await
            .map_err(|e| ChainClientError::Submit(format!("failed waiting for receipt: {e}")))?
            .ok_or_else(|| ChainClientError::Submit("transaction dropped from mempool".to_string()))?;

        Ok(BroadcastReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }
}

// ---------- wire types ----------

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfersResult {
    #[serde(default)]
    transfers: Vec<RawTransfer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    /// The indexer reports this as a JSON number (already decimal-scaled);
    /// occasionally as a string.
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    block_num: Option<String>,
    #[serde(default)]
    raw_contract: Option<RawContract>,
    #[serde(default)]
    metadata: Option<RawTransferMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransferMetadata {
    #[serde(default)]
    block_timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    #[serde(default)]
    logs: Vec<RawReceiptLog>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceiptLog {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: Option<String>,
}

fn record_from_raw(raw: RawTransfer) -> TransferRecord {
    let value = raw.value.and_then(|v| match v {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s),
        _ => None,
    });
    let raw_value = raw
        .raw_contract
        .as_ref()
        .and_then(|c| c.value.as_deref())
        .and_then(|h| parse_quantity(h).ok());
    let token_contract = raw.raw_contract.and_then(|c| c.address);
    TransferRecord {
        from: raw.from,
        to: raw.to,
        token_contract,
        value,
        raw_value,
        asset: raw.asset,
        block_number: raw.block_num.as_deref().and_then(parse_block_number),
        tx_hash: raw.hash.as_deref().and_then(|h| h.parse().ok()),
        timestamp: raw.metadata.and_then(|m| m.block_timestamp),
    }
}

fn logs_from_receipt(raw: RawReceipt) -> Result<Vec<TxLog>, ChainClientError> {
    raw.logs
        .into_iter()
        .map(|l| {
            let address = l
                .address
                .as_deref()
                .unwrap_or("0x0000000000000000000000000000000000000000")
                .parse()
                .map_err(|e| ChainClientError::Decode(format!("bad log address: {e}")))?;
            let topics = l
                .topics
                .iter()
                .map(|t| {
                    t.parse()
                        .map_err(|e| ChainClientError::Decode(format!("bad log topic: {e}")))
                })
                .collect::<Result<Vec<H256>, _>>()?;
            let data = decode_hex_bytes(l.data.as_deref().unwrap_or("0x"))?;
            Ok(TxLog {
                address,
                topics,
                data,
            })
        })
        .collect()
}

fn parse_quantity(s: &str) -> Result<U256, ChainClientError> {
    let digits = s.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ChainClientError::Decode(format!("bad hex quantity {s:?}: {e}")))
}

fn parse_block_number(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok()
}

fn decode_hex_bytes(s: &str) -> Result<Vec<u8>, ChainClientError> {
    hex::decode(s.trim().trim_start_matches("0x"))
        .map_err(|e| ChainClientError::Decode(format!("bad hex bytes: {e}")))
}
