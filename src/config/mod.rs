use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::device::DEFAULT_MAX_REGISTRATIONS;

const DEV_SESSION_SECRET: &str = "dev-session-secret-change-me";

/// Process configuration, read once at startup from the environment
/// (and `.env` when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub db_path: String,
    pub session_secret: String,
    pub cookie_secure: bool,
    pub device_max_registrations: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = dotenvy::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("BIND_ADDR is not a socket address")?;

        let db_path = dotenvy::var("DB_PATH").unwrap_or_else(|_| "minedb".to_string());

        let session_secret = dotenvy::var("SESSION_SECRET").unwrap_or_else(|_| {
            warn!("SESSION_SECRET not set; using development secret");
            DEV_SESSION_SECRET.to_string()
        });

        let cookie_secure = dotenvy::var("COOKIE_SECURE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let device_max_registrations = match dotenvy::var("DEVICE_MAX_REGISTRATIONS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .context("DEVICE_MAX_REGISTRATIONS must be a non-negative integer")?,
            Err(_) => DEFAULT_MAX_REGISTRATIONS,
        };

        Ok(Self {
            bind_addr,
            db_path,
            session_secret,
            cookie_secure,
            device_max_registrations,
        })
    }

    /// Configuration for in-process tests: throwaway secret, insecure cookies.
    pub fn for_tests(db_path: impl Into<String>) -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            db_path: db_path.into(),
            session_secret: "test-secret".to_string(),
            cookie_secure: false,
            device_max_registrations: DEFAULT_MAX_REGISTRATIONS,
        }
    }
}
