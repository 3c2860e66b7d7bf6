//! Claim-eligibility gate.
//!
//! Given a target address, the gate runs three read-only checks in order,
//! short-circuiting on the first failure, and only then authorizes the
//! disbursement:
//!
//! 1. at least one issuer -> target transfer of the gating token exists;
//! 2. the target's native balance is at or below the claim amount;
//! 3. no prior funding-address -> target native transfer exists.
//!
//! Every check outcome is a typed value ([`ClaimRejection`] carries the
//! machine-readable reason and supporting counts). Nothing is cached between
//! invocations; the chain itself is the durable "already claimed" guard. An
//! in-process reservation keyed by address narrows the window where two
//! concurrent claims could both pass check 3 before either transaction is
//! visible to the indexer — with more than one service instance the window
//! remains (see DESIGN.md).
#![forbid(unsafe_code)]

use crate::address::EthAddress;
use crate::chain::{ChainClient, ChainClientError, TransferFilter, TransferSummary};
use ethers::types::{H256, U256};
use ethers::utils::format_units;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Token issuer whose outbound transfers gate eligibility.
    pub issuer: EthAddress,
    /// Token contract the issuer check is restricted to.
    pub token_contract: EthAddress,
    /// This service's own funding account.
    pub funding_address: EthAddress,
    /// Fixed disbursement amount in base units; doubles as the balance
    /// threshold.
    pub claim_amount_wei: U256,
    /// Lower bound applied to the network gas price estimate.
    pub gas_price_floor_wei: U256,
    /// How long a claim reservation shields an address after a broadcast.
    pub reservation_ttl: Duration,
}

/// The derived eligibility triple, recomputed fresh on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityDecision {
    pub issuer_verified: bool,
    pub balance_eligible: bool,
    pub already_claimed: bool,
}

impl EligibilityDecision {
    pub fn eligible(&self) -> bool {
        self.issuer_verified && self.balance_eligible && !self.already_claimed
    }
}

/// Native balance of an address plus its eligibility verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceInfo {
    pub address: EthAddress,
    pub wei: U256,
    /// Native units, six decimal places. Display-only; eligibility compares
    /// integer base units.
    pub formatted: String,
    pub eligible: bool,
}

/// A granted (or dry-run-granted) disbursement.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimGrant {
    pub address: EthAddress,
    pub amount_wei: U256,
    /// The gas price that was (or would have been) used: the greater of the
    /// network estimate and the configured floor.
    pub gas_price_wei: U256,
    pub dry_run: bool,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub balance_before: BalanceInfo,
    pub checks: EligibilityDecision,
}

/// A well-formed negative outcome of the gate.
#[derive(Debug, thiserror::Error)]
pub enum ClaimRejection {
    #[error("this address has not received the gating token from the issuer")]
    NoIssuerTransfer { transfers_count: usize },

    #[error("address balance {balance_formatted} is above the claim threshold")]
    BalanceAboveThreshold {
        balance_wei: U256,
        balance_formatted: String,
    },

    #[error("this address has already received a disbursement from the funding address")]
    AlreadyClaimed { transfers_count: usize },

    #[error("a claim for this address is already in flight")]
    ClaimInFlight,
}

impl ClaimRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ClaimRejection::NoIssuerTransfer { .. } => "no_issuer_transfer",
            ClaimRejection::BalanceAboveThreshold { .. } => "balance_above_threshold",
            ClaimRejection::AlreadyClaimed { .. } => "already_claimed",
            ClaimRejection::ClaimInFlight => "claim_in_flight",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("{0}")]
    Rejected(#[from] ClaimRejection),
    #[error(transparent)]
    Chain(#[from] ChainClientError),
}

pub struct EligibilityGate {
    cfg: GateConfig,
    chain: Arc<dyn ChainClient>,
    /// address -> reservation expiry.
    reservations: Mutex<HashMap<EthAddress, Instant>>,
}

impl EligibilityGate {
    pub fn new(cfg: GateConfig, chain: Arc<dyn ChainClient>) -> Self {
        Self {
            cfg,
            chain,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    /// Issuer -> target transfer history of the gating token.
    pub async fn issuer_transfers(
        &self,
        address: &EthAddress,
    ) -> Result<TransferSummary, ChainClientError> {
        let filter = TransferFilter::erc20(
            self.cfg.issuer.clone(),
            address.clone(),
            self.cfg.token_contract.clone(),
        );
        let records = self.chain.get_asset_transfers(&filter).await?;
        Ok(TransferSummary::from_records(&records))
    }

    /// Native balance with the eligibility verdict applied.
    pub async fn balance(&self, address: &EthAddress) -> Result<BalanceInfo, ChainClientError> {
        let wei = self.chain.get_balance(address).await?;
        Ok(BalanceInfo {
            address: address.clone(),
            eligible: wei <= self.cfg.claim_amount_wei,
            formatted: format_native(wei),
            wei,
        })
    }

    /// Funding-address -> target native transfer history.
    pub async fn prior_disbursements(
        &self,
        address: &EthAddress,
    ) -> Result<TransferSummary, ChainClientError> {
        let filter = TransferFilter::native(self.cfg.funding_address.clone(), address.clone());
        let records = self.chain.get_asset_transfers(&filter).await?;
        Ok(TransferSummary::from_records(&records))
    }

    /// Run the full gate and, unless `dry_run`, broadcast the disbursement.
    pub async fn claim(
        &self,
        address: &EthAddress,
        dry_run: bool,
    ) -> Result<ClaimGrant, ClaimError> {
        self.reserve(address)?;
        let result = self.checked_disburse(address, dry_run).await;
        // A live broadcast keeps its reservation until TTL expiry so a repeat
        // claim is refused while the transfer is not yet indexer-visible.
        // Every other outcome releases immediately.
        match &result {
            Ok(grant) if !grant.dry_run => {}
            _ => self.release(address),
        }
        result
    }

    async fn checked_disburse(
        &self,
        address: &EthAddress,
        dry_run: bool,
    ) -> Result<ClaimGrant, ClaimError> {
        let issuer = self.issuer_transfers(address).await?;
        if !issuer.verified {
            return Err(ClaimRejection::NoIssuerTransfer {
                transfers_count: issuer.count,
            }
            .into());
        }

        let balance = self.balance(address).await?;
        if !balance.eligible {
            return Err(ClaimRejection::BalanceAboveThreshold {
                balance_wei: balance.wei,
                balance_formatted: balance.formatted,
            }
            .into());
        }

        let prior = self.prior_disbursements(address).await?;
        if prior.count > 0 {
            return Err(ClaimRejection::AlreadyClaimed {
                transfers_count: prior.count,
            }
            .into());
        }

        let network = self.chain.gas_price().await?;
        let gas_price = network.max(self.cfg.gas_price_floor_wei);
        let checks = EligibilityDecision {
            issuer_verified: true,
            balance_eligible: true,
            already_claimed: false,
        };

        if dry_run {
            info!(
                address = %address,
                gas_price_wei = %gas_price,
                "dry run: disbursement authorized, broadcast skipped"
            );
            return Ok(ClaimGrant {
                address: address.clone(),
                amount_wei: self.cfg.claim_amount_wei,
                gas_price_wei: gas_price,
                dry_run: true,
                tx_hash: None,
                block_number: None,
                balance_before: balance,
                checks,
            });
        }

        let receipt = self
            .chain
            .send_native_transfer(address, self.cfg.claim_amount_wei, gas_price)
            .await?;
        info!(
            address = %address,
            tx_hash = ?receipt.tx_hash,
            block_number = ?receipt.block_number,
            "disbursement broadcast"
        );

        Ok(ClaimGrant {
            address: address.clone(),
            amount_wei: self.cfg.claim_amount_wei,
            gas_price_wei: gas_price,
            dry_run: false,
            tx_hash: Some(receipt.tx_hash),
            block_number: receipt.block_number,
            balance_before: balance,
            checks,
        })
    }

    fn reserve(&self, address: &EthAddress) -> Result<(), ClaimRejection> {
        let mut map = self.reservations.lock().expect("mutex poisoned");
        let now = Instant::now();
        map.retain(|_, expires| *expires > now);
        if map.contains_key(address) {
            return Err(ClaimRejection::ClaimInFlight);
        }
        map.insert(address.clone(), now + self.cfg.reservation_ttl);
        Ok(())
    }

    fn release(&self, address: &EthAddress) {
        self.reservations
            .lock()
            .expect("mutex poisoned")
            .remove(address);
    }
}

/// Base units -> native units with six decimal places, for display only.
pub fn format_native(wei: U256) -> String {
    let s = format_units(wei, 18).unwrap_or_else(|_| "0".to_string());
    match s.split_once('.') {
        Some((int, frac)) => {
            let frac: String = frac.chars().take(6).collect();
            format!("{int}.{frac:0<6}")
        }
        None => format!("{s}.000000"),
    }
}
