//! Service layer of the faucet / ad-auction node: settings, API handlers,
//! and metrics. The binary in `main.rs` wires these into an axum server.
#![forbid(unsafe_code)]

pub mod api;
pub mod metrics;
pub mod settings;
