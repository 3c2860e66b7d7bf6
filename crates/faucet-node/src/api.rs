//! HTTP API handlers and wire types.
//!
//! Handlers live on [`FaucetApi`] and are transport-free: the axum layer in
//! `main` is a thin shell around them, so integration tests drive the same
//! code paths against the mock chain client.
//!
//! ## Endpoints
//!
//! - `POST /api/verify-issuer-transfer` (+ GET) - issuer-transfer verification
//! - `POST /api/balance` (+ GET) - native balance with eligibility verdict
//! - `POST /api/claim` - run the gate, optionally dry-run
//! - `POST /api/ad-history` - reconstructed bid history
//! - `GET  /api/current-ad` - contract-reported current ad (cacheable)
//! - `GET  /api/min-bid` - minimum bid with token metadata
//! - `POST /api/prepare-bid` - placeBid calldata for wallet-side signing
#![forbid(unsafe_code)]

use crate::metrics;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ethers::types::U256;
use faucet_core::address::EthAddress;
use faucet_core::auction::{AdAuctionReader, BidRecord};
use faucet_core::chain::{ChainClient, ChainClientError, TransferRecord};
use faucet_core::gate::{format_native, ClaimError, ClaimRejection, EligibilityGate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub struct FaucetApi {
    chain: Arc<dyn ChainClient>,
    gate: Arc<EligibilityGate>,
    auction: Arc<AdAuctionReader>,
}

impl FaucetApi {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        gate: Arc<EligibilityGate>,
        auction: Arc<AdAuctionReader>,
    ) -> Self {
        Self {
            chain,
            gate,
            auction,
        }
    }

    /// Issuer-transfer verification for one address.
    pub async fn verify_issuer_transfer(
        &self,
        raw_address: &str,
    ) -> Result<VerifyResponse, ApiError> {
        let address = parse_address(raw_address)?;
        let summary = self.gate.issuer_transfers(&address).await?;
        let message = if summary.verified {
            "this address has received the gating token from the issuer"
        } else {
            "this address has not received the gating token from the issuer"
        };
        Ok(VerifyResponse {
            verified: summary.verified,
            address,
            transfers_count: summary.count,
            total_received: summary.total_received,
            latest_transfer: summary.latest.map(latest_from_record),
            message: message.to_string(),
        })
    }

    /// Native balance for one address.
    pub async fn balance(&self, raw_address: &str) -> Result<BalanceResponse, ApiError> {
        let address = parse_address(raw_address)?;
        let info = self.gate.balance(&address).await?;
        Ok(BalanceResponse {
            address: info.address,
            balance: info.formatted.parse().unwrap_or(0.0),
            balance_formatted: info.formatted,
            balance_wei: info.wei.to_string(),
        })
    }

    /// Run the eligibility gate and, unless dry-run, disburse.
    pub async fn claim(&self, req: ClaimRequest) -> Result<ClaimResponse, ApiError> {
        let address = parse_address(&req.address)?;
        let result = self.gate.claim(&address, req.dry_run).await;

        let label = match &result {
            Ok(grant) if grant.dry_run => "dry_run",
            Ok(_) => "granted",
            Err(ClaimError::Rejected(r)) => r.reason_code(),
            Err(ClaimError::Chain(_)) => "error",
        };
        metrics::CLAIMS_TOTAL.with_label_values(&[label]).inc();

        let grant = result.map_err(|e| match e {
            ClaimError::Rejected(r) => ApiError::Rejected(r),
            ClaimError::Chain(c) => ApiError::Chain(c),
        })?;

        info!(
            address = %grant.address,
            dry_run = grant.dry_run,
            tx_hash = ?grant.tx_hash,
            "claim granted"
        );

        Ok(ClaimResponse {
            success: true,
            dry_run: grant.dry_run,
            address: grant.address,
            amount: format_native(grant.amount_wei),
            gas_price: grant.gas_price_wei.to_string(),
            transaction_hash: grant.tx_hash.map(|h| format!("0x{h:x}")),
            block_number: grant.block_number,
            balance_before: grant.balance_before.formatted,
            sender_transfer_verified: !grant.checks.already_claimed,
        })
    }

    /// Reconstructed bid history for the configured (or given) contract.
    pub async fn ad_history(&self, req: AdHistoryRequest) -> Result<AdHistoryResponse, ApiError> {
        let reader = match req.contract_address.as_deref() {
            None => self.auction.clone(),
            Some(raw) => {
                let contract = EthAddress::parse(raw).map_err(|_| {
                    ApiError::InvalidRequest("invalid contract address format".to_string())
                })?;
                if contract == *self.auction.contract() {
                    self.auction.clone()
                } else {
                    Arc::new(AdAuctionReader::new(self.chain.clone(), contract))
                }
            }
        };

        let token = req
            .erc20_token_address
            .as_deref()
            .map(|raw| {
                EthAddress::parse(raw).map_err(|_| {
                    ApiError::InvalidRequest("invalid token address format".to_string())
                })
            })
            .transpose()?;

        let history: Vec<AdHistoryItem> = reader
            .bid_history(token)
            .await?
            .into_iter()
            .map(history_item)
            .collect();
        Ok(AdHistoryResponse {
            total: history.len(),
            history,
        })
    }

    /// Contract-reported current ad.
    pub async fn current_ad(&self) -> Result<CurrentAdResponse, ApiError> {
        let ad = self.auction.current_ad().await?;
        Ok(CurrentAdResponse {
            bidder: ad.bidder,
            bid_amount: ad.bid_amount.to_string(),
            image_url: ad.image_url,
            alt_text: ad.alt_text,
            href_url: ad.href_url,
            timestamp: ad.timestamp,
        })
    }

    /// Minimum bid with token metadata.
    pub async fn min_bid(&self) -> Result<MinBidResponse, ApiError> {
        let min = self.auction.min_bid().await?;
        Ok(MinBidResponse {
            amount: min.amount.to_string(),
            formatted: min.formatted,
            symbol: min.symbol,
        })
    }

    /// Calldata for a placeBid transaction; signing stays with the caller.
    pub async fn prepare_bid(&self, req: PrepareBidRequest) -> Result<PrepareBidResponse, ApiError> {
        let amount = U256::from_dec_str(req.amount.trim())
            .map_err(|_| ApiError::InvalidRequest("invalid bid amount".to_string()))?;
        let prepared = self
            .auction
            .prepare_bid(&req.image_url, &req.alt_text, &req.href_url, amount);
        Ok(PrepareBidResponse {
            to: prepared.to,
            value: prepared.value.to_string(),
            data: format!("0x{}", hex::encode(prepared.data)),
        })
    }
}

fn parse_address(raw: &str) -> Result<EthAddress, ApiError> {
    EthAddress::parse(raw).map_err(|_| ApiError::InvalidAddress)
}

fn latest_from_record(r: TransferRecord) -> LatestTransfer {
    LatestTransfer {
        block_number: r.block_number,
        transaction_hash: r.tx_hash.map(|h| format!("0x{h:x}")),
        value: r.value,
        timestamp: r.timestamp,
    }
}

fn history_item(b: BidRecord) -> AdHistoryItem {
    AdHistoryItem {
        transaction_hash: b.tx_hash.map(|h| format!("0x{h:x}")),
        block_number: b.block_number,
        timestamp: b.timestamp,
        from: b.bidder.unwrap_or_default(),
        value: b.value.value_string(),
        value_source: b.value.source(),
        token_symbol: b.token_symbol,
        image_url: b.image_url,
        alt_text: b.alt_text,
        href_url: b.href_url,
    }
}

// ---------- request/response types ----------

#[derive(Debug, Clone, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub address: String,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub verified: bool,
    pub address: EthAddress,
    pub transfers_count: usize,
    pub total_received: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_transfer: Option<LatestTransfer>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestTransfer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: EthAddress,
    pub balance: f64,
    pub balance_formatted: String,
    pub balance_wei: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub dry_run: bool,
    pub address: EthAddress,
    pub amount: String,
    pub gas_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub balance_before: String,
    pub sender_transfer_verified: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHistoryRequest {
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub erc20_token_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdHistoryItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Unix seconds; `null` when the indexer supplied no block metadata.
    pub timestamp: Option<i64>,
    pub from: String,
    pub value: String,
    pub value_source: &'static str,
    pub token_symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdHistoryResponse {
    pub history: Vec<AdHistoryItem>,
    pub total: usize,
}

/// Kebab-case keys kept for compatibility with the ad-rendering frontend.
#[derive(Debug, Serialize)]
pub struct CurrentAdResponse {
    pub bidder: EthAddress,
    #[serde(rename = "bidAmount")]
    pub bid_amount: String,
    #[serde(rename = "image-url")]
    pub image_url: String,
    #[serde(rename = "alt-text")]
    pub alt_text: String,
    #[serde(rename = "href-url")]
    pub href_url: String,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinBidResponse {
    pub amount: String,
    pub formatted: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareBidRequest {
    pub image_url: String,
    pub alt_text: String,
    pub href_url: String,
    /// Bid amount in the payment token's base units, decimal string.
    pub amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareBidResponse {
    pub to: EthAddress,
    pub value: String,
    pub data: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------- error mapping ----------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid address format")]
    InvalidAddress,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Rejected(#[from] ClaimRejection),

    #[error("{0}")]
    Chain(#[from] ChainClientError),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidAddress | ApiError::InvalidRequest(_) => 400,
            ApiError::Rejected(ClaimRejection::ClaimInFlight) => 409,
            ApiError::Rejected(_) => 400,
            ApiError::Chain(ChainClientError::Config(_)) => 500,
            ApiError::Chain(ChainClientError::Submit(_)) => 500,
            ApiError::Chain(_) => 502,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidAddress => "invalid_address",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Rejected(r) => r.reason_code(),
            ApiError::Chain(ChainClientError::Config(_)) => "config",
            ApiError::Chain(ChainClientError::Network(_)) => "network",
            ApiError::Chain(ChainClientError::Timeout) => "timeout",
            ApiError::Chain(ChainClientError::HttpStatus(_)) => "upstream_status",
            ApiError::Chain(ChainClientError::Rpc { .. }) => "upstream_rpc",
            ApiError::Chain(ChainClientError::Decode(_)) => "decode",
            ApiError::Chain(ChainClientError::Submit(_)) => "submit",
        }
    }

    /// Machine-readable supporting fields merged into the error body.
    fn detail(&self) -> serde_json::Value {
        match self {
            ApiError::Rejected(ClaimRejection::NoIssuerTransfer { transfers_count }) => {
                serde_json::json!({ "transfersCount": transfers_count })
            }
            ApiError::Rejected(ClaimRejection::BalanceAboveThreshold {
                balance_wei,
                balance_formatted,
            }) => serde_json::json!({
                "balance": balance_formatted,
                "balanceWei": balance_wei.to_string(),
            }),
            ApiError::Rejected(ClaimRejection::AlreadyClaimed { transfers_count }) => {
                serde_json::json!({ "transfersCount": transfers_count })
            }
            ApiError::Chain(ChainClientError::Rpc { code, message }) => serde_json::json!({
                "upstreamCode": code,
                "upstreamMessage": message,
            }),
            ApiError::Chain(ChainClientError::HttpStatus(status)) => {
                serde_json::json!({ "upstreamStatus": status })
            }
            _ => serde_json::json!({}),
        }
    }
}

impl From<ClaimError> for ApiError {
    fn from(e: ClaimError) -> Self {
        match e {
            ClaimError::Rejected(r) => ApiError::Rejected(r),
            ClaimError::Chain(c) => ApiError::Chain(c),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = self.error_code(), error = %self, "request failed");
        } else {
            info!(code = self.error_code(), error = %self, "request rejected");
        }

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "errorCode": self.error_code(),
        });
        if let serde_json::Value::Object(extra) = self.detail() {
            if let Some(obj) = body.as_object_mut() {
                obj.extend(extra);
            }
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_statuses() {
        let err = ApiError::InvalidAddress;
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "invalid_address");

        let err = ApiError::Rejected(ClaimRejection::NoIssuerTransfer { transfers_count: 0 });
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "no_issuer_transfer");

        let err = ApiError::Rejected(ClaimRejection::ClaimInFlight);
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), "claim_in_flight");

        let err = ApiError::Chain(ChainClientError::Timeout);
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.error_code(), "timeout");

        let err = ApiError::Chain(ChainClientError::Submit("nope".to_string()));
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.error_code(), "submit");
    }

    #[test]
    fn rejection_detail_carries_counts() {
        let err = ApiError::Rejected(ClaimRejection::AlreadyClaimed { transfers_count: 1 });
        assert_eq!(err.detail()["transfersCount"], 1);

        let err = ApiError::Chain(ChainClientError::Rpc {
            code: -32000,
            message: "boom".to_string(),
        });
        assert_eq!(err.detail()["upstreamCode"], -32000);
    }

    #[test]
    fn claim_request_accepts_camel_case_dry_run() {
        let req: ClaimRequest = serde_json::from_str(
            r#"{"address":"0x1111111111111111111111111111111111111111","dryRun":true}"#,
        )
        .unwrap();
        assert!(req.dry_run);

        let req: ClaimRequest = serde_json::from_str(
            r#"{"address":"0x1111111111111111111111111111111111111111"}"#,
        )
        .unwrap();
        assert!(!req.dry_run);
    }

    #[test]
    fn current_ad_response_keeps_kebab_keys() {
        let resp = CurrentAdResponse {
            bidder: EthAddress::parse("0x1111111111111111111111111111111111111111").unwrap(),
            bid_amount: "100".to_string(),
            image_url: "img".to_string(),
            alt_text: "alt".to_string(),
            href_url: "href".to_string(),
            timestamp: 7,
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["image-url"], "img");
        assert_eq!(v["alt-text"], "alt");
        assert_eq!(v["href-url"], "href");
        assert_eq!(v["bidAmount"], "100");
    }

    #[test]
    fn live_claim_response_omits_dry_run_flag() {
        let resp = ClaimResponse {
            success: true,
            dry_run: false,
            address: EthAddress::parse("0x1111111111111111111111111111111111111111").unwrap(),
            amount: "0.001000".to_string(),
            gas_price: "30000000000".to_string(),
            transaction_hash: Some("0xabc".to_string()),
            block_number: Some(1),
            balance_before: "0.000000".to_string(),
            sender_transfer_verified: true,
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("dryRun").is_none());
        assert_eq!(v["transactionHash"], "0xabc");
    }
}
