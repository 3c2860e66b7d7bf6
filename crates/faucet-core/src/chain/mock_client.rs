//! Deterministic in-memory mock chain client for tests and offline smoke paths.
//!
//! Besides canned data, the mock counts calls per method and records every
//! broadcast transfer, so tests can assert both "no network I/O happened
//! before validation" and "zero native transactions sent".
#![forbid(unsafe_code)]

use super::{
    BroadcastReceipt, ChainClient, ChainClientError, TransferCategory, TransferFilter,
    TransferRecord, TxLog,
};
use crate::address::EthAddress;
use async_trait::async_trait;
use ethers::types::{H256, U256};
use std::collections::HashMap;
use std::sync::Mutex;

/// A native transfer the mock was asked to broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransfer {
    pub to: EthAddress,
    pub value: U256,
    pub gas_price: U256,
}

#[derive(Default)]
struct MockState {
    erc20_transfers: HashMap<(Option<EthAddress>, EthAddress), Vec<TransferRecord>>,
    native_transfers: HashMap<(Option<EthAddress>, EthAddress), Vec<TransferRecord>>,
    balances: HashMap<EthAddress, U256>,
    gas_price: U256,
    receipts: HashMap<H256, Vec<TxLog>>,
    call_results: HashMap<[u8; 4], Vec<u8>>,
    failing_calls: Vec<[u8; 4]>,
    failing_methods: HashMap<&'static str, String>,
    sent: Vec<SentTransfer>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transfer(
        &self,
        category: TransferCategory,
        from: Option<EthAddress>,
        to: EthAddress,
        record: TransferRecord,
    ) {
        let mut s = self.state.lock().expect("mutex poisoned");
        let map = match category {
            TransferCategory::Erc20 => &mut s.erc20_transfers,
            TransferCategory::External => &mut s.native_transfers,
        };
        map.entry((from, to)).or_default().push(record);
    }

    pub fn set_balance(&self, address: EthAddress, wei: U256) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .balances
            .insert(address, wei);
    }

    pub fn set_gas_price(&self, wei: U256) {
        self.state.lock().expect("mutex poisoned").gas_price = wei;
    }

    pub fn set_receipt_logs(&self, tx_hash: H256, logs: Vec<TxLog>) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .receipts
            .insert(tx_hash, logs);
    }

    /// Canned return data for an `eth_call`, keyed by the calldata selector.
    pub fn set_call_result(&self, selector: [u8; 4], return_data: Vec<u8>) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .call_results
            .insert(selector, return_data);
    }

    /// Make `eth_call` with the given selector revert.
    pub fn fail_call(&self, selector: [u8; 4]) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .failing_calls
            .push(selector);
    }

    /// Inject a network failure for one trait method (by name).
    pub fn fail_method(&self, method: &'static str, message: &str) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .failing_methods
            .insert(method, message.to_string());
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.state.lock().expect("mutex poisoned").sent.clone()
    }

    pub fn calls(&self, method: &'static str) -> usize {
        *self
            .state
            .lock()
            .expect("mutex poisoned")
            .calls
            .get(method)
            .unwrap_or(&0)
    }

    pub fn total_calls(&self) -> usize {
        self.state
            .lock()
            .expect("mutex poisoned")
            .calls
            .values()
            .sum()
    }

    fn record_call(&self, method: &'static str) -> Result<(), ChainClientError> {
        let mut s = self.state.lock().expect("mutex poisoned");
        *s.calls.entry(method).or_insert(0) += 1;
        if let Some(msg) = s.failing_methods.get(method) {
            return Err(ChainClientError::Network(msg.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_asset_transfers(
        &self,
        filter: &TransferFilter,
    ) -> Result<Vec<TransferRecord>, ChainClientError> {
        self.record_call("get_asset_transfers")?;
        let s = self.state.lock().expect("mutex poisoned");
        let map = match filter.category.first() {
            Some(TransferCategory::External) => &s.native_transfers,
            _ => &s.erc20_transfers,
        };
        let key = (filter.from_address.clone(), filter.to_address.clone());
        Ok(map.get(&key).cloned().unwrap_or_default())
    }

    async fn get_balance(&self, address: &EthAddress) -> Result<U256, ChainClientError> {
        self.record_call("get_balance")?;
        let s = self.state.lock().expect("mutex poisoned");
        Ok(s.balances.get(address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, ChainClientError> {
        self.record_call("gas_price")?;
        Ok(self.state.lock().expect("mutex poisoned").gas_price)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<Vec<TxLog>>, ChainClientError> {
        self.record_call("get_transaction_receipt")?;
        let s = self.state.lock().expect("mutex poisoned");
        Ok(s.receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, _to: &EthAddress, calldata: Vec<u8>) -> Result<Vec<u8>, ChainClientError> {
        self.record_call("call")?;
        let s = self.state.lock().expect("mutex poisoned");
        let selector: [u8; 4] = calldata
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .unwrap_or_default();
        if s.failing_calls.contains(&selector) {
            return Err(ChainClientError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            });
        }
        match s.call_results.get(&selector) {
            Some(data) => Ok(data.clone()),
            None => Err(ChainClientError::Rpc {
                code: -32000,
                message: "execution reverted".to_string(),
            }),
        }
    }

    async fn send_native_transfer(
        &self,
        to: &EthAddress,
        value: U256,
        gas_price: U256,
    ) -> Result<BroadcastReceipt, ChainClientError> {
        self.record_call("send_native_transfer")?;
        let mut s = self.state.lock().expect("mutex poisoned");
        s.sent.push(SentTransfer {
            to: to.clone(),
            value,
            gas_price,
        });
        let n = s.sent.len() as u64;
        Ok(BroadcastReceipt {
            tx_hash: H256::from_low_u64_be(n),
            block_number: Some(1_000 + n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_and_counts_calls() {
        let mock = MockChainClient::new();
        let to = EthAddress::parse("0x1111111111111111111111111111111111111111").unwrap();

        assert_eq!(mock.total_calls(), 0);
        let receipt = mock
            .send_native_transfer(&to, U256::from(1u64), U256::from(30u64))
            .await
            .unwrap();
        assert_eq!(receipt.block_number, Some(1_001));
        assert_eq!(mock.sent().len(), 1);
        assert_eq!(mock.calls("send_native_transfer"), 1);
    }

    #[tokio::test]
    async fn transfers_match_on_category_and_addresses() {
        let mock = MockChainClient::new();
        let issuer = EthAddress::parse("0x8549e82239a88f463ab6e55ad1895b629a00def3").unwrap();
        let target = EthAddress::parse("0x1111111111111111111111111111111111111111").unwrap();
        let token = EthAddress::parse("0xe7c3d8c9a439fede00d2600032d5db0be71c3c29").unwrap();

        mock.add_transfer(
            TransferCategory::Erc20,
            Some(issuer.clone()),
            target.clone(),
            TransferRecord {
                value: Some("100".to_string()),
                ..Default::default()
            },
        );

        let hit = mock
            .get_asset_transfers(&TransferFilter::erc20(
                issuer.clone(),
                target.clone(),
                token,
            ))
            .await
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = mock
            .get_asset_transfers(&TransferFilter::native(issuer, target))
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_network_errors() {
        let mock = MockChainClient::new();
        mock.fail_method("gas_price", "boom");
        let err = mock.gas_price().await.unwrap_err();
        assert!(matches!(err, ChainClientError::Network(m) if m == "boom"));
    }
}
