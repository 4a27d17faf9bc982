use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_admin,
    clock::SystemClock,
    handlers::{activate, create_license, deactivate, health, heartbeat, list_licenses, validate},
    registry::Registry,
    store::RedbStore,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on /admin routes. Mandatory — the server
    /// refuses to start without one.
    pub admin_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("KEYSEAT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("KEYSEAT_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            admin_key: std::env::var("KEYSEAT_ADMIN_KEY").ok(),
            data_dir: std::env::var("KEYSEAT_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("KEYSEAT_CORS_ORIGINS").ok(),
        }
    }
}

/// Resolve the data directory, creating it if needed.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Assemble the full route tree. Public so integration tests can drive the
/// router without binding a socket.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/activate", post(activate))
        .route("/validate", post(validate))
        .route("/heartbeat", post(heartbeat))
        .route("/deactivate", post(deactivate));

    let admin = Router::new()
        .route("/admin/create", post(create_license))
        .route("/admin/list", get(list_licenses))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new().merge(public).merge(admin).with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let admin_key = cfg
        .admin_key
        .context("KEYSEAT_ADMIN_KEY is required — /admin routes must be authenticated")?;

    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join("keyseat.db");
    let store = RedbStore::open(&db_path).context("open store")?;

    let registry = Registry::new(Arc::new(store), Arc::new(SystemClock));
    let state = AppState {
        registry,
        admin_key,
    };

    let cors = build_cors(cfg.cors_origins.as_deref());
    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "keyseat server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
