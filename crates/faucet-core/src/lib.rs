//! Core library for the faucet / ad-auction service.
//!
//! This crate holds everything below the HTTP surface:
//!
//! - [`address`] — canonical account identifiers with strict validation.
//! - [`chain`] — the chain-client contract: a transport-agnostic trait over
//!   the remote indexer/RPC provider, an HTTP adapter, and a deterministic
//!   in-memory mock for tests.
//! - [`gate`] — the claim-eligibility gate: issuer-transfer verification,
//!   balance threshold, prior-disbursement check, and the conditional
//!   native-token disbursement.
//! - [`auction`] — read-side of the on-chain ad auction: current ad, minimum
//!   bid, and bid-history reconstruction from transfer events.
//!
//! The design constraint throughout: every check is a typed value, not a
//! caught exception, and every external call goes through [`chain::ChainClient`]
//! so the whole decision pipeline runs against the mock in tests.
#![forbid(unsafe_code)]

pub mod address;
pub mod auction;
pub mod chain;
pub mod gate;

pub use address::EthAddress;
