//! Prometheus metrics and the instrumented chain-client wrapper.
#![forbid(unsafe_code)]

use async_trait::async_trait;
use ethers::types::{H256, U256};
use faucet_core::address::EthAddress;
use faucet_core::chain::{
    BroadcastReceipt, ChainClient, ChainClientError, TransferFilter, TransferRecord, TxLog,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

static START: Lazy<Instant> = Lazy::new(Instant::now);

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CHAIN_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("chain_requests_total", "Total chain/indexer requests"),
        &["method", "status"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static CHAIN_REQUEST_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "chain_request_failures_total",
            "Total chain/indexer request failures",
        ),
        &["reason"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static CLAIMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("claims_total", "Total claim requests by outcome"),
        &["result"],
    )
    .expect("metric");
    REGISTRY.register(Box::new(c.clone())).expect("register");
    c
});

pub static PROCESS_UPTIME_SECONDS: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::with_opts(Opts::new(
        "process_uptime_seconds",
        "Process uptime in seconds",
    ))
    .expect("metric");
    REGISTRY.register(Box::new(g.clone())).expect("register");
    g
});

pub fn gather_text() -> String {
    PROCESS_UPTIME_SECONDS.set(START.elapsed().as_secs_f64());
    let mf = REGISTRY.gather();
    let mut out = Vec::new();
    TextEncoder::new().encode(&mf, &mut out).expect("encode");
    String::from_utf8(out).unwrap_or_default()
}

fn failure_reason(err: &ChainClientError) -> &'static str {
    match err {
        ChainClientError::Config(_) => "config",
        ChainClientError::Network(_) => "network",
        ChainClientError::Timeout => "timeout",
        ChainClientError::HttpStatus(_) => "upstream_status",
        ChainClientError::Rpc { .. } => "upstream_rpc",
        ChainClientError::Decode(_) => "decode",
        ChainClientError::Submit(_) => "submit",
    }
}

/// Counts every chain request by method and outcome, delegating to the inner
/// client.
pub struct InstrumentedChainClient {
    inner: Arc<dyn ChainClient>,
}

impl InstrumentedChainClient {
    pub fn new(inner: Arc<dyn ChainClient>) -> Self {
        // Ensure metrics are registered before the first scrape.
        let _ = &*CHAIN_REQUESTS_TOTAL;
        let _ = &*CHAIN_REQUEST_FAILURES_TOTAL;
        let _ = &*CLAIMS_TOTAL;
        let _ = &*PROCESS_UPTIME_SECONDS;
        Self { inner }
    }

    fn record<T>(
        &self,
        method: &'static str,
        result: Result<T, ChainClientError>,
    ) -> Result<T, ChainClientError> {
        match &result {
            Ok(_) => {
                CHAIN_REQUESTS_TOTAL
                    .with_label_values(&[method, "ok"])
                    .inc();
            }
            Err(e) => {
                let reason = failure_reason(e);
                CHAIN_REQUESTS_TOTAL
                    .with_label_values(&[method, reason])
                    .inc();
                CHAIN_REQUEST_FAILURES_TOTAL
                    .with_label_values(&[reason])
                    .inc();
                warn!(method, error = %e, "chain request failed");
            }
        }
        result
    }
}

#[async_trait]
impl ChainClient for InstrumentedChainClient {
    async fn get_asset_transfers(
        &self,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferRecord>, ChainClientError> {
        let r = self.inner.get_asset_transfers(filter).await;
        self.record("get_asset_transfers", r)
    }

    async fn get_balance(&self, address: &EthAddress) -> Result<U256, ChainClientError> {
        let r = self.inner.get_balance(address).await;
        self.record("get_balance", r)
    }

    async fn gas_price(&self) -> Result<U256, ChainClientError> {
        let r = self.inner.gas_price().await;
        self.record("gas_price", r)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<Vec<TxLog>>, ChainClientError> {
        let r = self.inner.get_transaction_receipt(tx_hash).await;
        self.record("get_transaction_receipt", r)
    }

    async fn call(&self, to: &EthAddress, calldata: Vec<u8>) -> Result<Vec<u8>, ChainClientError> {
        let r = self.inner.call(to, calldata).await;
        self.record("call", r)
    }

    async fn send_native_transfer(
        &self,
        to: &EthAddress,
        value: U256,
        gas_price: U256,
    ) -> Result<BroadcastReceipt, ChainClientError> {
        let r = self.inner.send_native_transfer(to, value, gas_price).await;
        self.record("send_native_transfer", r)
    }
}
