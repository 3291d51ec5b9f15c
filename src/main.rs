use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bit2block::{
    app::{router, AppState},
    config::AppConfig,
};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let state = AppState::new(AppConfig::from_env()?)?;
    let addr = state.config.bind_addr;

    // Expired session rows are dead already; this only reclaims space.
    let db = state.db.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match db.purge_expired_sessions(chrono::Utc::now().timestamp()).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired sessions swept"),
                Err(err) => error!(error = ?err, "session sweep failed"),
            }
        }
    });

    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "bit2block mining API listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
