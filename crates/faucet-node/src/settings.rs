//! Environment-provided settings, resolved once at startup.
//!
//! Every required value that is missing or malformed fails the process with a
//! descriptive error before any chain call is made.
#![forbid(unsafe_code)]

use clap::Parser;
use ethers::types::U256;
use ethers::utils::parse_ether;
use faucet_core::address::EthAddress;
use faucet_core::chain::http_client::ChainClientConfig;
use faucet_core::gate::GateConfig;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Faucet / ad-auction node")]
pub struct Settings {
    #[arg(long, env = "FAUCET_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Remote JSON-RPC / indexer endpoint URL (typically carries an API key).
    #[arg(long, env = "FAUCET_RPC_ENDPOINT")]
    pub rpc_endpoint: String,

    /// Hex-encoded signing key of the funding account.
    #[arg(long, env = "FAUCET_SIGNING_KEY", hide_env_values = true)]
    pub signing_key: String,

    /// Address the signing key must derive to; the disbursement sender.
    #[arg(long, env = "FAUCET_FUNDING_ADDRESS")]
    pub funding_address: String,

    /// Ad-auction contract address.
    #[arg(long, env = "FAUCET_AUCTION_CONTRACT")]
    pub auction_contract: String,

    /// Token issuer whose outbound transfers gate claim eligibility.
    #[arg(
        long,
        env = "FAUCET_ISSUER_ADDRESS",
        default_value = "0x8549e82239a88f463ab6e55ad1895b629a00def3"
    )]
    pub issuer_address: String,

    /// Token contract the issuer check is restricted to.
    #[arg(
        long,
        env = "FAUCET_TOKEN_CONTRACT",
        default_value = "0xe7c3d8c9a439fede00d2600032d5db0be71c3c29"
    )]
    pub token_contract: String,

    /// Disbursement amount in native units; doubles as the balance threshold.
    #[arg(long, env = "FAUCET_CLAIM_AMOUNT", default_value = "0.001")]
    pub claim_amount: String,

    #[arg(long, env = "FAUCET_GAS_PRICE_FLOOR_GWEI", default_value_t = 30)]
    pub gas_price_floor_gwei: u64,

    #[arg(long, env = "FAUCET_CHAIN_ID", default_value_t = 137)]
    pub chain_id: u64,

    /// How long a broadcast claim keeps its address reserved.
    #[arg(long, env = "FAUCET_CLAIM_TTL_SECS", default_value_t = 60)]
    pub claim_ttl_secs: u64,

    #[arg(long, env = "FAUCET_RPC_TIMEOUT_MS", default_value_t = 10_000)]
    pub rpc_timeout_ms: u64,

    #[arg(long, env = "FAUCET_METRICS_ENABLED", default_value_t = true)]
    pub metrics_enabled: bool,
}

/// Settings with every address and amount parsed into its domain type.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub gate: GateConfig,
    pub chain: ChainClientConfig,
    pub auction_contract: EthAddress,
}

impl Settings {
    pub fn resolve(&self) -> Result<ResolvedConfig, String> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err("FAUCET_RPC_ENDPOINT is empty".to_string());
        }
        if self.signing_key.trim().is_empty() {
            return Err("FAUCET_SIGNING_KEY is empty".to_string());
        }

        let issuer = parse_address(&self.issuer_address, "FAUCET_ISSUER_ADDRESS")?;
        let token_contract = parse_address(&self.token_contract, "FAUCET_TOKEN_CONTRACT")?;
        let funding_address = parse_address(&self.funding_address, "FAUCET_FUNDING_ADDRESS")?;
        let auction_contract = parse_address(&self.auction_contract, "FAUCET_AUCTION_CONTRACT")?;

        let claim_amount_wei = parse_ether(&self.claim_amount).map_err(|e| {
            format!(
                "invalid FAUCET_CLAIM_AMOUNT {:?}: {e}",
                self.claim_amount
            )
        })?;
        if claim_amount_wei.is_zero() {
            return Err("FAUCET_CLAIM_AMOUNT must be greater than zero".to_string());
        }

        let gas_price_floor_wei = U256::from(self.gas_price_floor_gwei) * U256::exp10(9);

        Ok(ResolvedConfig {
            gate: GateConfig {
                issuer,
                token_contract,
                funding_address: funding_address.clone(),
                claim_amount_wei,
                gas_price_floor_wei,
                reservation_ttl: Duration::from_secs(self.claim_ttl_secs),
            },
            chain: ChainClientConfig {
                endpoint: self.rpc_endpoint.clone(),
                signing_key: self.signing_key.clone(),
                chain_id: self.chain_id,
                funding_address,
                timeout_ms: self.rpc_timeout_ms,
            },
            auction_contract,
        })
    }
}

fn parse_address(raw: &str, name: &str) -> Result<EthAddress, String> {
    EthAddress::parse(raw).map_err(|e| format!("invalid {name}: {e}"))
}
