use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const USERNAME_MIN_CHARS: usize = 3;
pub const USERNAME_MAX_CHARS: usize = 20;
pub const ACCESS_KEY_MIN_CHARS: usize = 6;

/// Display scale for fiat-like balances (USDT, hash power).
pub const FIAT_SCALE: u32 = 2;
/// Display scale for coin balances (BTC, GBTC, unclaimed rewards).
pub const COIN_SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Member,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        UserRole::Member
    }
}

/// Persisted account row. Balances are stored as decimal strings so a
/// round trip through the store never passes through binary floating point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub access_key_hash: String,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub registration_ip: Option<String>,

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

    #[serde(default)]
    pub last_active_block: Option<i64>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub is_frozen: bool,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub has_started_mining: bool,
    #[serde(default)]
    pub kyc_verified: bool,
    #[serde(default)]
    pub kyc_verification_hash: Option<String>,
    pub created_ts: i64,
}

impl User {
    /// Fresh account with every balance at zero, carrying the display scale
    /// each balance is reported with.
    pub fn new(id: String, username: String, access_key_hash: String, created_ts: i64) -> Self {
        let fiat_zero = Decimal::new(0, FIAT_SCALE);
        let coin_zero = Decimal::new(0, COIN_SCALE);
        Self {
            id,
            username,
            access_key_hash,
            referral_code: None,
            referred_by: None,
            registration_ip: None,
            usdt_balance: fiat_zero,
            btc_balance: coin_zero,
            hash_power: fiat_zero,
            base_hash_power: fiat_zero,
            referral_hash_bonus: fiat_zero,
            gbtc_balance: coin_zero,
            unclaimed_balance: coin_zero,
            total_referral_earnings: fiat_zero,
            last_active_block: None,
            role: UserRole::Member,
            is_frozen: false,
            is_banned: false,
            has_started_mining: false,
            kyc_verified: false,
            kyc_verification_hash: None,
            created_ts,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// True when no balance is negative.
    pub fn balances_non_negative(&self) -> bool {
        [
            self.usdt_balance,
            self.btc_balance,
            self.hash_power,
            self.base_hash_power,
            self.referral_hash_bonus,
            self.gbtc_balance,
            self.unclaimed_balance,
            self.total_referral_earnings,
        ]
        .iter()
        .all(|b| !b.is_sign_negative() || b.is_zero())
    }
}
