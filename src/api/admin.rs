use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::info;

use crate::{
    api::{
        auth::AdminUser,
        types::{
            parse_amount, AdminUserView, CreditRequest, DeviceLinkView, DevicePolicyRequest,
            DeviceView,
        },
    },
    app::AppState,
    auth::accounts::{FlagUpdate, PlatformStats},
    errors::AppError,
    ledger::CreditReceipt,
};

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Vec<AdminUserView>>, AppError> {
    let users = state.accounts.list_users().await?;
    Ok(Json(users.iter().map(AdminUserView::from).collect()))
}

pub async fn stats(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<PlatformStats>, AppError> {
    Ok(Json(state.accounts.platform_stats().await?))
}

pub async fn set_user_flags(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    payload: Result<Json<FlagUpdate>, JsonRejection>,
) -> Result<Json<AdminUserView>, AppError> {
    let Json(update) = payload?;
    info!(admin_id = %admin.user.id, target = %user_id, ?update, "admin flag change");

    let user = state.accounts.set_flags(&user_id, update).await?;
    Ok(Json(AdminUserView::from(&user)))
}

pub async fn credit_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    payload: Result<Json<CreditRequest>, JsonRejection>,
) -> Result<Json<CreditReceipt>, AppError> {
    let Json(req) = payload?;
    let amount = parse_amount(&req.amount)?;
    info!(admin_id = %admin.user.id, target = %user_id, asset = ?req.asset, %amount, "admin credit");

    Ok(Json(state.ledger.credit(&user_id, req.asset, amount).await?))
}

pub async fn user_devices(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<DeviceLinkView>>, AppError> {
    let links = state.devices.links_for_user(&user_id).await?;
    Ok(Json(links.iter().map(DeviceLinkView::from).collect()))
}

pub async fn device(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceView>, AppError> {
    let device = state.devices.get(&device_id).await?;
    Ok(Json(DeviceView::from(&device)))
}

pub async fn set_device_policy(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(device_id): Path<String>,
    payload: Result<Json<DevicePolicyRequest>, JsonRejection>,
) -> Result<Json<DeviceView>, AppError> {
    let Json(req) = payload?;
    info!(admin_id = %admin.user.id, device_id = %device_id, "admin device policy change");

    let device = state
        .devices
        .set_policy(&device_id, req.blocked, req.max_registrations)
        .await?;
    Ok(Json(DeviceView::from(&device)))
}
