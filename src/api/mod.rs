use axum::{
    routing::{get, post},
    Router,
};

use crate::app::AppState;

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod types;

use handlers::{
    btc_balance, btc_prices, claim_rewards, current_user, device_check, device_link,
    global_stats, login, logout, purchase_power, referrals, register, start_mining,
    supply_metrics, verify_kyc,
};

/// Public API. Routes that need a session take `AuthenticatedUser`;
/// `/api/users` and `/api/admin/*` take `AdminUser`.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // account
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/user", get(current_user))
        .route("/api/referrals", get(referrals))
        .route("/api/kyc/verify", post(verify_kyc))
        // device gate
        .route("/api/device/check", post(device_check))
        .route("/api/device/link", post(device_link))
        // mining
        .route("/api/purchase-power", post(purchase_power))
        .route("/api/start-mining", post(start_mining))
        .route("/api/claim-rewards", post(claim_rewards))
        .route("/api/btc/balance", get(btc_balance))
        .route("/api/global-stats", get(global_stats))
        .route("/api/supply-metrics", get(supply_metrics))
        .route("/api/btc/prices", get(btc_prices))
        // admin
        .route("/api/users", get(admin::list_users))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/users/{user_id}/flags", post(admin::set_user_flags))
        .route("/api/admin/users/{user_id}/credit", post(admin::credit_user))
        .route("/api/admin/users/{user_id}/devices", get(admin::user_devices))
        .route("/api/admin/devices/{device_id}", get(admin::device))
        .route("/api/admin/devices/{device_id}/policy", post(admin::set_device_policy))
}
