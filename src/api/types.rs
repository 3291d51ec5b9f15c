use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    errors::AppError,
    ledger::{ClaimReceipt, CreditAsset, PurchaseReceipt},
    model::{
        device::{DeviceFingerprint, DeviceSignals},
        user::User,
        user_device::UserDevice,
    },
};

// ============================================================
// REQUESTS
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub access_key: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub access_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCheckRequest {
    pub server_device_id: String,
    #[serde(flatten)]
    pub signals: DeviceSignals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkRequest {
    pub device_id: String,
}

/// Amounts travel as decimal strings, never JSON numbers.
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycRequest {
    pub verification_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub asset: CreditAsset,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePolicyRequest {
    #[serde(default)]
    pub blocked: Option<bool>,
    #[serde(default)]
    pub max_registrations: Option<u32>,
}

pub fn parse_amount(raw: &str) -> Result<Decimal, AppError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| AppError::Validation("Invalid amount".into()))
}

// ============================================================
// RESPONSES
// ============================================================

/// What a client may see of a user row. No credential material.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub referral_code: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub usdt_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub btc_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub hash_power: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub base_hash_power: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub referral_hash_bonus: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub gbtc_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unclaimed_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_referral_earnings: Decimal,
    pub has_started_mining: bool,
    pub kyc_verified: bool,
    pub is_admin: bool,
    pub is_frozen: bool,
    pub is_banned: bool,
    pub created_at: i64,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            referral_code: u.referral_code.clone(),
            usdt_balance: u.usdt_balance,
            btc_balance: u.btc_balance,
            hash_power: u.hash_power,
            base_hash_power: u.base_hash_power,
            referral_hash_bonus: u.referral_hash_bonus,
            gbtc_balance: u.gbtc_balance,
            unclaimed_balance: u.unclaimed_balance,
            total_referral_earnings: u.total_referral_earnings,
            has_started_mining: u.has_started_mining,
            kyc_verified: u.kyc_verified,
            is_admin: u.is_admin(),
            is_frozen: u.is_frozen,
            is_banned: u.is_banned,
            created_at: u.created_ts,
        }
    }
}

/// Admin listing: the client view plus provenance fields only operators see.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    #[serde(flatten)]
    pub user: UserView,
    pub referred_by: Option<String>,
    pub registration_ip: Option<String>,
    pub last_active_block: Option<i64>,
    pub kyc_verification_hash: Option<String>,
}

impl From<&User> for AdminUserView {
    fn from(u: &User) -> Self {
        Self {
            user: UserView::from(u),
            referred_by: u.referred_by.clone(),
            registration_ip: u.registration_ip.clone(),
            last_active_block: u.last_active_block,
            kyc_verification_hash: u.kyc_verification_hash.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub receipt: PurchaseReceipt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMiningResponse {
    pub message: &'static str,
    pub already_mining: bool,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub receipt: ClaimReceipt,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::str")]
    pub btc_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub gbtc_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unclaimed_balance: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsResponse {
    pub total_users: usize,
    pub active_miners: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_hash_power: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HalvingProgress {
    pub next_halving: u64,
    pub blocks_remaining: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyMetricsResponse {
    pub circulating: &'static str,
    pub current_block_reward: &'static str,
    pub halving_progress: HalvingProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcPricesResponse {
    pub btc_price: &'static str,
    pub hashrate_price: &'static str,
    #[serde(rename = "requiredHashratePerBTC")]
    pub required_hashrate_per_btc: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KycResponse {
    pub success: bool,
    pub kyc_verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub id: String,
    pub server_device_id: String,
    pub last_ip: Option<String>,
    pub registrations: u32,
    pub max_registrations: u32,
    pub blocked: bool,
    pub risk_score: i64,
    pub updated_at: i64,
}

impl From<&DeviceFingerprint> for DeviceView {
    fn from(d: &DeviceFingerprint) -> Self {
        Self {
            id: d.id.clone(),
            server_device_id: d.server_device_id.clone(),
            last_ip: d.last_ip.clone(),
            registrations: d.registrations,
            max_registrations: d.max_registrations,
            blocked: d.blocked,
            risk_score: d.risk_score,
            updated_at: d.updated_ts,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLinkView {
    pub id: String,
    pub device_id: String,
    pub created_at: i64,
}

impl From<&UserDevice> for DeviceLinkView {
    fn from(l: &UserDevice) -> Self {
        Self {
            id: l.id.clone(),
            device_id: l.device_id.clone(),
            created_at: l.created_ts,
        }
    }
}
