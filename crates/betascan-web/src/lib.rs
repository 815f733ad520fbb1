//! Axum JSON surface: one GET route per scan kind plus health and diagnostics.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use betascan_storage::PgStore;
use betascan_sync::{
    build_reconciler, debug_matching, run_definition, Reconciler, ScanOverrides, ScanRegistry,
    ScanSummary, SyncConfig,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "betascan-web";

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub registry: Arc<ScanRegistry>,
}

impl AppState {
    pub fn new(reconciler: Reconciler, registry: ScanRegistry) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            registry: Arc::new(registry),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/keep_alive", get(keep_alive_handler))
        .route("/debug_matching", get(debug_matching_handler))
        .route("/{kind}", get(scan_handler))
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    ["BETASCAN_WEB_PORT", "PORT"]
        .iter()
        .find_map(|key| std::env::var(key).ok().and_then(|v| v.parse().ok()))
        .unwrap_or(DEFAULT_PORT)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let registry = ScanRegistry::load(&config.scans_file).await?;
    let store = PgStore::connect(&config.database_url).await?;
    let reconciler = build_reconciler(&config, Arc::new(store))?;

    let port = port_from_env();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, scans = ?registry.names().collect::<Vec<_>>(), "serving scan endpoints");
    axum::serve(listener, app(AppState::new(reconciler, registry))).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({ "status": "healthy", "timestamp": Utc::now() })).into_response()
}

async fn keep_alive_handler() -> Response {
    Json(json!({ "status": "alive", "timestamp": Utc::now() })).into_response()
}

async fn scan_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(overrides): Query<ScanOverrides>,
) -> Response {
    let Some(scan) = state.registry.scan(&kind) else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown scan kind {kind}"));
    };
    match run_definition(&state.reconciler, scan, &overrides).await {
        Ok(report) => Json(ScanSummary::from(&report)).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn debug_matching_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(scan) = state.registry.matching_definition() else {
        return error_response(StatusCode::NOT_FOUND, "no matching scan configured".to_string());
    };
    match debug_matching(&state.reconciler, scan).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => server_error(err.into()),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
