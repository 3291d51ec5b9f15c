use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{header, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    api,
    auth::{accounts::AccountService, credentials::CredentialStore, session::SessionAuthority},
    config::AppConfig,
    db::DBLayer,
    device::DeviceGate,
    ledger::LedgerEngine,
};

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DBLayer>,
    pub sessions: Arc<SessionAuthority>,
    pub accounts: Arc<AccountService>,
    pub devices: Arc<DeviceGate>,
    pub ledger: Arc<LedgerEngine>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(DBLayer::new(&config.db_path)?);
        let credentials = CredentialStore;

        Ok(Self {
            sessions: Arc::new(SessionAuthority::new(
                db.clone(),
                &config.session_secret,
                config.cookie_secure,
            )),
            accounts: Arc::new(AccountService::new(db.clone(), credentials)),
            devices: Arc::new(DeviceGate::new(db.clone(), config.device_max_registrations)),
            ledger: Arc::new(LedgerEngine::new(db.clone())),
            config: Arc::new(config),
            db,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api::api_router())
        // Cookie sessions need credentialed CORS, which rules out `*`.
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "bit2block-mining" }))
}
