//! Chain-client contract.
//!
//! The rest of the crate only depends on the [`ChainClient`] trait: a minimal,
//! transport-agnostic view of the remote indexer/RPC provider. Runtime
//! transports are adapters implementing the trait:
//!
//! - [`http_client::HttpChainClient`] — JSON-RPC 2.0 over HTTP, plus a signing
//!   wallet for the one state-changing operation.
//! - [`mock_client::MockChainClient`] — deterministic in-memory fixture used
//!   by tests and offline smoke paths.
//!
//! Historical transfer queries use the indexer's filter object verbatim (block
//! range, category, from/to filters, pagination cap), so the wire shape is
//! part of this contract and covered by tests.
#![forbid(unsafe_code)]

pub mod http_client;
pub mod mock_client;

use crate::address::EthAddress;
use async_trait::async_trait;
use ethers::types::{H256, U256};
use serde::Serialize;

/// Pagination cap for eligibility queries (100, hex-encoded on the wire).
pub const ELIGIBILITY_MAX_COUNT: &str = "0x64";
/// Pagination cap for bid-history queries (1000, hex-encoded on the wire).
pub const HISTORY_MAX_COUNT: &str = "0x3e8";

/// Transfer categories understood by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferCategory {
    /// ERC20 token transfers (event-log based).
    Erc20,
    /// Native-asset transfers between externally owned accounts.
    External,
}

/// Filter object for historical transfer queries.
///
/// Serialized as the single JSON-RPC parameter object, field names matching
/// the indexer's camelCase wire format.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFilter {
    pub from_block: String,
    pub to_block: String,
    pub category: Vec<TransferCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<EthAddress>,
    pub to_address: EthAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_addresses: Option<Vec<EthAddress>>,
    pub exclude_zero_value: bool,
    pub max_count: String,
    pub order: String,
    pub with_metadata: bool,
}

impl TransferFilter {
    fn base(category: TransferCategory, to: EthAddress, max_count: &str) -> Self {
        Self {
            from_block: "0x0".to_string(),
            to_block: "latest".to_string(),
            category: vec![category],
            from_address: None,
            to_address: to,
            contract_addresses: None,
            exclude_zero_value: true,
            max_count: max_count.to_string(),
            order: "desc".to_string(),
            with_metadata: true,
        }
    }

    /// ERC20 transfers of one token contract from a fixed sender to `to`.
    pub fn erc20(from: EthAddress, to: EthAddress, token_contract: EthAddress) -> Self {
        let mut f = Self::base(TransferCategory::Erc20, to, ELIGIBILITY_MAX_COUNT);
        f.from_address = Some(from);
        f.contract_addresses = Some(vec![token_contract]);
        f
    }

    /// Native-asset transfers from a fixed sender to `to`.
    pub fn native(from: EthAddress, to: EthAddress) -> Self {
        let mut f = Self::base(TransferCategory::External, to, ELIGIBILITY_MAX_COUNT);
        f.from_address = Some(from);
        f
    }

    /// All ERC20 transfers into `to`, optionally restricted to one token.
    /// Used for bid-history reconstruction (larger pagination cap).
    pub fn erc20_into(to: EthAddress, token_contract: Option<EthAddress>) -> Self {
        let mut f = Self::base(TransferCategory::Erc20, to, HISTORY_MAX_COUNT);
        f.contract_addresses = token_contract.map(|t| vec![t]);
        f
    }
}

/// One historical transfer as reported by the indexer. Immutable, never
/// persisted locally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferRecord {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Token contract for ERC20 transfers.
    pub token_contract: Option<String>,
    /// Decimal value string as reported by the indexer (already scaled by the
    /// token's decimals). The indexer emits this as a JSON number; it is
    /// carried here in its string representation.
    pub value: Option<String>,
    /// Raw on-chain value in base units, when the indexer reports it.
    pub raw_value: Option<U256>,
    /// Asset symbol as labeled by the indexer, e.g. "JPYC" or "POL".
    pub asset: Option<String>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
    /// Block timestamp in RFC 3339 form, when metadata was requested.
    pub timestamp: Option<String>,
}

/// Aggregate view over a transfer query result.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub verified: bool,
    pub count: usize,
    /// Sum of per-record values parsed from their string representation.
    pub total_received: f64,
    /// Newest record (the indexer returns descending order).
    pub latest: Option<TransferRecord>,
}

impl TransferSummary {
    pub fn from_records(records: &[TransferRecord]) -> Self {
        Self {
            verified: !records.is_empty(),
            count: records.len(),
            total_received: total_received(records),
            latest: records.first().cloned(),
        }
    }
}

/// Sum of per-record values, each parsed from its string representation.
/// Unparseable or absent values count as zero.
pub fn total_received(records: &[TransferRecord]) -> f64 {
    records
        .iter()
        .map(|r| {
            r.value
                .as_deref()
                .unwrap_or("0")
                .parse::<f64>()
                .unwrap_or(0.0)
        })
        .sum()
}

/// One event log of a mined transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxLog {
    pub address: ethers::types::Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Outcome of a broadcast native transfer, after waiting for inclusion.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("upstream RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("transaction submission failed: {0}")]
    Submit(String),
}

/// Required provider capabilities, expressed as a minimal async client trait.
///
/// Implementations must be safe to share behind an `Arc` across requests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Historical transfer query against the indexer.
    async fn get_asset_transfers(
        &self,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferRecord>, ChainClientError>;

    /// Native balance of `address` at the latest block, in base units.
    async fn get_balance(&self, address: &EthAddress) -> Result<U256, ChainClientError>;

    /// Network-reported gas price estimate, in base units.
    async fn gas_price(&self) -> Result<U256, ChainClientError>;

    /// Event logs of a mined transaction, `None` if unknown to the provider.
    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<Vec<TxLog>>, ChainClientError>;

    /// Read-only contract call (`eth_call` at the latest block).
    async fn call(&self, to: &EthAddress, calldata: Vec<u8>) -> Result<Vec<u8>, ChainClientError>;

    /// Sign and broadcast a native transfer, then wait for the receipt.
    async fn send_native_transfer(
        &self,
        to: &EthAddress,
        value: U256,
        gas_price: U256,
    ) -> Result<BroadcastReceipt, ChainClientError>;
}
