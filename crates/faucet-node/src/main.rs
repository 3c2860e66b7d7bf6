#![forbid(unsafe_code)]

use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use faucet_core::auction::AdAuctionReader;
use faucet_core::chain::http_client::HttpChainClient;
use faucet_core::chain::ChainClient;
use faucet_core::gate::EligibilityGate;
use faucet_node::api::{
    AdHistoryRequest, AdHistoryResponse, AddressRequest, ApiError, BalanceResponse, ClaimRequest,
    ClaimResponse, FaucetApi, MinBidResponse, PrepareBidRequest, PrepareBidResponse,
    VerifyResponse,
};
use faucet_node::metrics::{self, InstrumentedChainClient};
use faucet_node::settings::Settings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Cache policy for the current-ad payload: short CDN cache with
/// stale-while-revalidate to keep the rendered ad from flickering.
const AD_CACHE_CONTROL: &str = "public, s-maxage=30, stale-while-revalidate=300";

#[derive(Debug, Error)]
enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    api: Arc<FaucetApi>,
    chain_summary: Arc<ChainSummary>,
    start_instant: Instant,
    metrics_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainSummary {
    chain_id: u64,
    issuer: String,
    token_contract: String,
    funding_address: String,
    auction_contract: String,
}

#[derive(Serialize)]
struct StatusResponse {
    service: ServiceInfo,
    uptime_ms: u64,
    chain: Arc<ChainSummary>,
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "node terminated with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), NodeError> {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cfg = settings.resolve().map_err(NodeError::Config)?;
    info!(
        listen_addr = %settings.listen_addr,
        chain_id = cfg.chain.chain_id,
        issuer = %cfg.gate.issuer,
        token_contract = %cfg.gate.token_contract,
        funding_address = %cfg.gate.funding_address,
        auction_contract = %cfg.auction_contract,
        "starting faucet-node"
    );

    let http = HttpChainClient::new(&cfg.chain).map_err(|e| NodeError::Config(e.to_string()))?;
    let chain: Arc<dyn ChainClient> = Arc::new(InstrumentedChainClient::new(Arc::new(http)));
    let gate = Arc::new(EligibilityGate::new(cfg.gate.clone(), chain.clone()));
    let auction = Arc::new(AdAuctionReader::new(
        chain.clone(),
        cfg.auction_contract.clone(),
    ));
    let api = Arc::new(FaucetApi::new(chain, gate, auction));

    let state = AppState {
        api,
        chain_summary: Arc::new(ChainSummary {
            chain_id: cfg.chain.chain_id,
            issuer: cfg.gate.issuer.to_string(),
            token_contract: cfg.gate.token_contract.to_string(),
            funding_address: cfg.gate.funding_address.to_string(),
            auction_contract: cfg.auction_contract.to_string(),
        }),
        start_instant: Instant::now(),
        metrics_enabled: settings.metrics_enabled,
    };

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/verify-issuer-transfer",
            post(verify_post).get(verify_get),
        )
        .route("/api/balance", post(balance_post).get(balance_get))
        .route("/api/claim", post(claim))
        .route("/api/ad-history", post(ad_history))
        .route("/api/current-ad", get(current_ad))
        .route("/api/min-bid", get(min_bid))
        .route("/api/prepare-bid", post(prepare_bid))
        .with_state(state);

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid FAUCET_LISTEN_ADDR: {e}")))?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| NodeError::Server(e.to_string()))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health() -> impl IntoResponse {
    "ok"
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_millis = state.start_instant.elapsed().as_millis();
    Json(StatusResponse {
        service: ServiceInfo {
            name: "faucet-node",
            version: env!("CARGO_PKG_VERSION"),
        },
        uptime_ms: u64::try_from(uptime_millis).unwrap_or(u64::MAX),
        chain: state.chain_summary.clone(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if !state.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled\n".to_string()).into_response();
    }
    (StatusCode::OK, metrics::gather_text()).into_response()
}

#[derive(Debug, Deserialize)]
struct AddressQuery {
    address: Option<String>,
}

fn require_address(q: AddressQuery) -> Result<String, ApiError> {
    q.address
        .ok_or_else(|| ApiError::InvalidRequest("address query parameter is required".to_string()))
}

async fn verify_post(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    state
        .api
        .verify_issuer_transfer(&req.address)
        .await
        .map(Json)
}

async fn verify_get(
    State(state): State<AppState>,
    Query(q): Query<AddressQuery>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let address = require_address(q)?;
    state.api.verify_issuer_transfer(&address).await.map(Json)
}

async fn balance_post(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    state.api.balance(&req.address).await.map(Json)
}

async fn balance_get(
    State(state): State<AppState>,
    Query(q): Query<AddressQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = require_address(q)?;
    state.api.balance(&address).await.map(Json)
}

async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    state.api.claim(req).await.map(Json)
}

/// The request body is optional; an absent or empty body falls back to the
/// configured auction contract.
async fn ad_history(
    State(state): State<AppState>,
    body: Option<Json<AdHistoryRequest>>,
) -> Result<Json<AdHistoryResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    state.api.ad_history(req).await.map(Json)
}

async fn current_ad(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.api.current_ad().await?;
    let mut resp = Json(body).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(AD_CACHE_CONTROL),
    );
    headers.insert(
        HeaderName::from_static("cdn-cache-control"),
        HeaderValue::from_static(AD_CACHE_CONTROL),
    );
    Ok(resp)
}

async fn min_bid(State(state): State<AppState>) -> Result<Json<MinBidResponse>, ApiError> {
    state.api.min_bid().await.map(Json)
}

async fn prepare_bid(
    State(state): State<AppState>,
    Json(req): Json<PrepareBidRequest>,
) -> Result<Json<PrepareBidResponse>, ApiError> {
    state.api.prepare_bid(req).await.map(Json)
}
