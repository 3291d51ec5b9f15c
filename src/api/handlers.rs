use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::CookieJar;
use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::{
    api::{
        auth::{session_token, AuthenticatedUser, ClientIp},
        types::{
            parse_amount, AmountRequest, BalanceResponse, BtcPricesResponse, ClaimResponse,
            DeviceCheckRequest, DeviceLinkRequest, GlobalStatsResponse, HalvingProgress,
            KycRequest, KycResponse, LoginRequest, MessageResponse, PurchaseResponse,
            RegisterRequest, StartMiningResponse, SuccessResponse, SupplyMetricsResponse,
            UserView,
        },
    },
    app::AppState,
    auth::accounts::{ReferralSummary, Registration},
    device::DeviceCheck,
    errors::AppError,
    ledger::MiningStart,
};

// ============================================================
// ACCOUNT
// ============================================================

pub async fn register(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<UserView>), AppError> {
    let Json(req) = payload?;

    let user = state
        .accounts
        .register(
            Registration {
                username: req.username,
                access_key: req.access_key,
                referral_code: req.referral_code,
            },
            ip.as_deref(),
        )
        .await?;

    let issued = state.sessions.issue(&user.id).await?;
    let jar = jar.add(state.sessions.session_cookie(issued.token));

    Ok((StatusCode::CREATED, jar, Json(UserView::from(&user))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<UserView>), AppError> {
    let Json(req) = payload?;

    let user = state.accounts.login(&req.username, &req.access_key).await?;
    let issued = state.sessions.issue(&user.id).await?;
    let jar = jar.add(state.sessions.session_cookie(issued.token));

    Ok((jar, Json(UserView::from(&user))))
}

/// Always succeeds and always clears the cookie; a stale or foreign token
/// simply has nothing to revoke.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    if let Some(token) = session_token(&headers) {
        if let Err(err) = state.sessions.revoke(&token).await {
            match AppError::from(err) {
                AppError::Internal(e) => return Err(AppError::Internal(e)),
                other => debug!(reason = %other, "logout with unusable token"),
            }
        }
    }

    let jar = jar.add(state.sessions.removal_cookie());
    Ok((
        jar,
        Json(MessageResponse {
            message: "Logged out successfully".into(),
        }),
    ))
}

pub async fn current_user(AuthenticatedUser(identity): AuthenticatedUser) -> Json<UserView> {
    Json(UserView::from(&identity.user))
}

pub async fn referrals(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<ReferralSummary>, AppError> {
    Ok(Json(state.accounts.referral_summary(&identity.user).await?))
}

pub async fn verify_kyc(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    payload: Result<Json<KycRequest>, JsonRejection>,
) -> Result<Json<KycResponse>, AppError> {
    let Json(req) = payload?;
    let user = state
        .accounts
        .submit_kyc(&identity.user.id, &req.verification_hash)
        .await?;

    Ok(Json(KycResponse {
        success: true,
        kyc_verified: user.kyc_verified,
    }))
}

// ============================================================
// DEVICE
// ============================================================

pub async fn device_check(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: Result<Json<DeviceCheckRequest>, JsonRejection>,
) -> Result<Json<DeviceCheck>, AppError> {
    let Json(req) = payload?;
    let check = state
        .devices
        .check(&req.server_device_id, ip.as_deref(), req.signals)
        .await?;
    Ok(Json(check))
}

pub async fn device_link(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    payload: Result<Json<DeviceLinkRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let Json(req) = payload?;
    state.devices.link(&identity.user.id, &req.device_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// MINING
// ============================================================

pub async fn purchase_power(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let Json(req) = payload?;
    let amount = parse_amount(&req.amount)?;

    let receipt = state.ledger.purchase_power(&identity.user.id, amount).await?;
    Ok(Json(PurchaseResponse {
        message: "Hash power purchased successfully",
        receipt,
    }))
}

pub async fn start_mining(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<StartMiningResponse>, AppError> {
    let outcome = state.ledger.start_mining(&identity.user.id).await?;
    Ok(Json(StartMiningResponse {
        message: "Mining started successfully",
        already_mining: outcome == MiningStart::AlreadyMining,
    }))
}

pub async fn claim_rewards(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<ClaimResponse>, AppError> {
    let receipt = state.ledger.claim_rewards(&identity.user.id).await?;
    Ok(Json(ClaimResponse {
        message: "Rewards claimed successfully",
        receipt,
    }))
}

pub async fn btc_balance(AuthenticatedUser(identity): AuthenticatedUser) -> Json<BalanceResponse> {
    let user = &identity.user;
    Json(BalanceResponse {
        btc_balance: user.btc_balance,
        gbtc_balance: user.gbtc_balance,
        unclaimed_balance: user.unclaimed_balance,
    })
}

pub async fn global_stats(
    State(state): State<AppState>,
    AuthenticatedUser(_): AuthenticatedUser,
) -> Result<Json<GlobalStatsResponse>, AppError> {
    let stats = state.accounts.platform_stats().await?;
    Ok(Json(GlobalStatsResponse {
        total_users: stats.user_count,
        active_miners: stats.active_miners,
        total_hash_power: stats.total_hash_power,
    }))
}

// Fixed figures; there is no chain or price feed behind these.
pub async fn supply_metrics(AuthenticatedUser(_): AuthenticatedUser) -> Json<SupplyMetricsResponse> {
    Json(SupplyMetricsResponse {
        circulating: "0.00000000",
        current_block_reward: "50.00000000",
        halving_progress: HalvingProgress {
            next_halving: 210_000,
            blocks_remaining: 210_000,
        },
    })
}

pub async fn btc_prices(AuthenticatedUser(_): AuthenticatedUser) -> Json<BtcPricesResponse> {
    Json(BtcPricesResponse {
        btc_price: "95000.00",
        hashrate_price: "1.00",
        required_hashrate_per_btc: 95_000.0,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}
