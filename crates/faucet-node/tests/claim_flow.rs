//! End-to-end API flows against the mock chain client.

use ethers::types::U256;
use faucet_core::address::EthAddress;
use faucet_core::auction::AdAuctionReader;
use faucet_core::chain::mock_client::MockChainClient;
use faucet_core::chain::{ChainClient, TransferCategory, TransferRecord};
use faucet_core::gate::{EligibilityGate, GateConfig};
use faucet_node::api::{AdHistoryRequest, ApiError, ClaimRequest, FaucetApi};
use std::sync::Arc;
use std::time::Duration;

fn addr(s: &str) -> EthAddress {
    EthAddress::parse(s).unwrap()
}

fn issuer() -> EthAddress {
    addr("0x8549e82239a88f463ab6e55ad1895b629a00def3")
}

fn token() -> EthAddress {
    addr("0xe7c3d8c9a439fede00d2600032d5db0be71c3c29")
}

fn funding() -> EthAddress {
    addr("0x2222222222222222222222222222222222222222")
}

fn auction_contract() -> EthAddress {
    addr("0x3333333333333333333333333333333333333333")
}

fn target() -> EthAddress {
    addr("0x1111111111111111111111111111111111111111")
}

fn gwei(n: u64) -> U256 {
    U256::from(n) * U256::exp10(9)
}

fn setup() -> (Arc<MockChainClient>, FaucetApi) {
    let mock = Arc::new(MockChainClient::new());
    let chain: Arc<dyn ChainClient> = mock.clone();
    let gate = Arc::new(EligibilityGate::new(
        GateConfig {
            issuer: issuer(),
            token_contract: token(),
            funding_address: funding(),
            claim_amount_wei: U256::exp10(15),
            gas_price_floor_wei: gwei(30),
            reservation_ttl: Duration::from_secs(60),
        },
        chain.clone(),
    ));
    let auction = Arc::new(AdAuctionReader::new(chain.clone(), auction_contract()));
    (mock, FaucetApi::new(chain, gate, auction))
}

fn add_issuer_transfer(mock: &MockChainClient) {
    mock.add_transfer(
        TransferCategory::Erc20,
        Some(issuer()),
        target(),
        TransferRecord {
            value: Some("1000".to_string()),
            block_number: Some(100),
            timestamp: Some("2025-11-04T10:29:44.000Z".to_string()),
            ..Default::default()
        },
    );
}

#[tokio::test]
async fn malformed_address_is_rejected_before_any_chain_call() {
    let (mock, api) = setup();

    let err = api.verify_issuer_transfer("0x123").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidAddress));

    let err = api.balance("not-an-address").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidAddress));

    let err = api
        .claim(ClaimRequest {
            address: "0xZZZZ111111111111111111111111111111111111".to_string(),
            dry_run: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidAddress));
    assert_eq!(err.status_code(), 400);

    assert_eq!(mock.total_calls(), 0);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn dry_run_claim_reports_gas_price_and_no_transaction() {
    let (mock, api) = setup();
    add_issuer_transfer(&mock);
    mock.set_gas_price(gwei(10)); // below the configured floor

    let resp = api
        .claim(ClaimRequest {
            address: target().as_str().to_string(),
            dry_run: true,
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert!(resp.dry_run);
    assert!(resp.transaction_hash.is_none());
    assert!(resp.block_number.is_none());
    assert_eq!(resp.gas_price, gwei(30).to_string());
    assert_eq!(resp.amount, "0.001000");
    assert!(resp.sender_transfer_verified);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn claim_without_issuer_transfer_sends_nothing() {
    let (mock, api) = setup();

    let err = api
        .claim(ClaimRequest {
            address: target().as_str().to_string(),
            dry_run: false,
        })
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "no_issuer_transfer");
    assert_eq!(err.status_code(), 400);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn claim_with_prior_disbursement_is_already_claimed() {
    let (mock, api) = setup();
    add_issuer_transfer(&mock);
    mock.add_transfer(
        TransferCategory::External,
        Some(funding()),
        target(),
        TransferRecord {
            value: Some("0.001".to_string()),
            block_number: Some(200),
            ..Default::default()
        },
    );

    let err = api
        .claim(ClaimRequest {
            address: target().as_str().to_string(),
            dry_run: false,
        })
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "already_claimed");
    assert_eq!(err.status_code(), 400);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn live_claim_broadcasts_once_and_returns_the_hash() {
    let (mock, api) = setup();
    add_issuer_transfer(&mock);
    mock.set_gas_price(gwei(50));

    let resp = api
        .claim(ClaimRequest {
            address: target().as_str().to_string(),
            dry_run: false,
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert!(!resp.dry_run);
    assert!(resp.transaction_hash.is_some());
    assert_eq!(resp.gas_price, gwei(50).to_string());

    let sent = mock.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, target());
    assert_eq!(sent[0].value, U256::exp10(15));

    // A repeat claim for the same address is refused while the reservation
    // is live.
    let err = api
        .claim(ClaimRequest {
            address: target().as_str().to_string(),
            dry_run: true,
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "claim_in_flight");
    assert_eq!(err.status_code(), 409);
    assert_eq!(mock.sent().len(), 1);
}

#[tokio::test]
async fn verify_reports_counts_totals_and_latest_transfer() {
    let (mock, api) = setup();
    add_issuer_transfer(&mock);
    mock.add_transfer(
        TransferCategory::Erc20,
        Some(issuer()),
        target(),
        TransferRecord {
            value: Some("500.5".to_string()),
            block_number: Some(90),
            ..Default::default()
        },
    );

    let resp = api
        .verify_issuer_transfer(target().as_str())
        .await
        .unwrap();
    assert!(resp.verified);
    assert_eq!(resp.transfers_count, 2);
    assert_eq!(resp.total_received, 1500.5);
    let latest = resp.latest_transfer.unwrap();
    assert_eq!(latest.block_number, Some(100));
    assert_eq!(latest.timestamp.as_deref(), Some("2025-11-04T10:29:44.000Z"));

    let other = api
        .verify_issuer_transfer("0x9999999999999999999999999999999999999999")
        .await
        .unwrap();
    assert!(!other.verified);
    assert_eq!(other.transfers_count, 0);
    assert!(other.latest_transfer.is_none());
}

#[tokio::test]
async fn balance_endpoint_formats_native_units() {
    let (mock, api) = setup();
    mock.set_balance(target(), U256::exp10(14) * U256::from(5u64)); // 0.0005

    let resp = api.balance(target().as_str()).await.unwrap();
    assert_eq!(resp.balance_formatted, "0.000500");
    assert_eq!(resp.balance, 0.0005);
    assert_eq!(resp.balance_wei, "500000000000000");
}

#[tokio::test]
async fn upstream_failures_surface_as_gateway_errors() {
    let (mock, api) = setup();
    mock.fail_method("get_asset_transfers", "indexer unavailable");

    let err = api
        .verify_issuer_transfer(target().as_str())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "network");
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn ad_history_flattens_tagged_bid_values() {
    let (mock, api) = setup();
    mock.add_transfer(
        TransferCategory::Erc20,
        None,
        auction_contract(),
        TransferRecord {
            from: Some("0x5555555555555555555555555555555555555555".to_string()),
            raw_value: Some(U256::from(777u64)),
            block_number: Some(42),
            asset: Some("JPYC".to_string()),
            timestamp: Some("2025-11-04T10:29:44.000Z".to_string()),
            ..Default::default()
        },
    );

    let resp = api.ad_history(AdHistoryRequest::default()).await.unwrap();
    assert_eq!(resp.total, 1);
    let item = &resp.history[0];
    assert_eq!(item.value, "777");
    assert_eq!(item.value_source, "rawTransfer");
    assert_eq!(item.token_symbol, "JPYC");
    assert_eq!(item.timestamp, Some(1762252184));

    // A malformed override is rejected up front.
    let err = api
        .ad_history(AdHistoryRequest {
            contract_address: Some("0xnope".to_string()),
            erc20_token_address: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_request");
}
