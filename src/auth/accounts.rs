use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::credentials::CredentialStore,
    db::DBLayer,
    errors::AppError,
    model::user::{User, UserRole, ACCESS_KEY_MIN_CHARS, USERNAME_MAX_CHARS, USERNAME_MIN_CHARS},
};

const REFERRAL_PREFIX_CHARS: usize = 6;
const REFERRAL_CODE_ATTEMPTS: usize = 8;

/// Well-formed stored key that matches nothing. Unknown usernames are
/// verified against it so both login failures cost one scrypt run.
const DECOY_ACCESS_KEY_HASH: &str =
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Username must be 3-20 characters")]
    InvalidUsername,
    #[error("Access key must be at least 6 characters")]
    InvalidAccessKey,
    #[error("Username already exists")]
    UsernameTaken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is banned")]
    Banned,
    #[error("Account is frozen")]
    Frozen,
    #[error("Verification hash is required")]
    MissingVerificationHash,
    #[error("User not found")]
    UserNotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidUsername
            | AccountError::InvalidAccessKey
            | AccountError::MissingVerificationHash => AppError::Validation(err.to_string()),
            AccountError::UsernameTaken => AppError::Conflict(err.to_string()),
            AccountError::InvalidCredentials => AppError::Unauthorized(err.to_string()),
            AccountError::Banned | AccountError::Frozen => AppError::Forbidden(err.to_string()),
            AccountError::UserNotFound => AppError::NotFound(err.to_string()),
            AccountError::Store(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub access_key: String,
    pub referral_code: Option<String>,
}

/// Moderation change set; `None` leaves a flag as it is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    #[serde(default)]
    pub banned: Option<bool>,
    #[serde(default)]
    pub frozen: Option<bool>,
    #[serde(default)]
    pub admin: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSummary {
    pub referral_code: Option<String>,
    pub total_referrals: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_earnings: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub user_count: usize,
    pub active_miners: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_hash_power: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_usdt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_gbtc: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_unclaimed: Decimal,
}

/// Account lifecycle: registration, login, moderation, KYC.
pub struct AccountService {
    db: Arc<DBLayer>,
    credentials: CredentialStore,
}

impl AccountService {
    pub fn new(db: Arc<DBLayer>, credentials: CredentialStore) -> Self {
        Self { db, credentials }
    }

    pub async fn register(&self, reg: Registration, client_ip: Option<&str>) -> Result<User, AccountError> {
        let username = reg.username.trim().to_string();
        let name_len = username.chars().count();
        if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&name_len) {
            return Err(AccountError::InvalidUsername);
        }
        if reg.access_key.chars().count() < ACCESS_KEY_MIN_CHARS {
            return Err(AccountError::InvalidAccessKey);
        }

        // Cheap early rejection; the transaction below re-checks.
        if self.db.find_user_by_username(&username).await?.is_some() {
            return Err(AccountError::UsernameTaken);
        }

        let access_key_hash = self.credentials.spawn_hash(reg.access_key).await?;
        let referred_by = self.resolve_referrer(reg.referral_code.as_deref()).await?;

        let user = self.create_account(
            &username,
            &access_key_hash,
            referred_by.as_deref(),
            client_ip,
        )?;

        info!(
            user_id = %user.id,
            username = %user.username,
            referred = user.referred_by.is_some(),
            "user registered"
        );
        Ok(user)
    }

    pub async fn login(&self, username: &str, access_key: &str) -> Result<User, AccountError> {
        let Some(user) = self.db.find_user_by_username(username.trim()).await? else {
            self.credentials
                .spawn_verify(DECOY_ACCESS_KEY_HASH.to_string(), access_key.to_string())
                .await;
            return Err(AccountError::InvalidCredentials);
        };

        let valid = self
            .credentials
            .spawn_verify(user.access_key_hash.clone(), access_key.to_string())
            .await;
        if !valid {
            warn!(user_id = %user.id, "login rejected: bad access key");
            return Err(AccountError::InvalidCredentials);
        }

        if user.is_banned {
            return Err(AccountError::Banned);
        }
        if user.is_frozen {
            return Err(AccountError::Frozen);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn set_flags(&self, user_id: &str, update: FlagUpdate) -> Result<User, AccountError> {
        let user = self
            .db
            .update_user("set_flags", user_id, |user| {
                if let Some(banned) = update.banned {
                    user.is_banned = banned;
                }
                if let Some(frozen) = update.frozen {
                    user.is_frozen = frozen;
                }
                if let Some(admin) = update.admin {
                    user.role = if admin { UserRole::Admin } else { UserRole::Member };
                }
                Ok::<_, AccountError>(true)
            })?
            .ok_or(AccountError::UserNotFound)?;

        info!(
            user_id,
            banned = user.is_banned,
            frozen = user.is_frozen,
            admin = user.is_admin(),
            "moderation flags updated"
        );
        Ok(user)
    }

    /// Records the opaque hash produced by the external verification flow.
    /// An already verified account keeps its first hash.
    pub async fn submit_kyc(&self, user_id: &str, verification_hash: &str) -> Result<User, AccountError> {
        let verification_hash = verification_hash.trim();
        if verification_hash.is_empty() {
            return Err(AccountError::MissingVerificationHash);
        }

        let user = self
            .db
            .update_user("submit_kyc", user_id, |user| {
                if user.kyc_verified {
                    return Ok::<_, AccountError>(false);
                }
                user.kyc_verified = true;
                user.kyc_verification_hash = Some(verification_hash.to_string());
                Ok(true)
            })?
            .ok_or(AccountError::UserNotFound)?;

        info!(user_id, "kyc verification recorded");
        Ok(user)
    }

    pub async fn referral_summary(&self, user: &User) -> Result<ReferralSummary, AccountError> {
        let total_referrals = self
            .db
            .list_users()
            .await?
            .iter()
            .filter(|u| u.referred_by.as_deref() == Some(user.id.as_str()))
            .count();

        Ok(ReferralSummary {
            referral_code: user.referral_code.clone(),
            total_referrals,
            total_earnings: user.total_referral_earnings,
        })
    }

    /// All users, newest first.
    pub async fn list_users(&self) -> Result<Vec<User>, AccountError> {
        let mut users = self.db.list_users().await?;
        users.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then_with(|| a.username.cmp(&b.username)));
        Ok(users)
    }

    pub async fn platform_stats(&self) -> Result<PlatformStats, AccountError> {
        let users = self.db.list_users().await?;
        let mut stats = PlatformStats {
            user_count: users.len(),
            active_miners: 0,
            total_hash_power: Decimal::ZERO,
            total_usdt: Decimal::ZERO,
            total_gbtc: Decimal::ZERO,
            total_unclaimed: Decimal::ZERO,
        };
        for user in &users {
            if user.has_started_mining {
                stats.active_miners += 1;
            }
            stats.total_hash_power += user.hash_power;
            stats.total_usdt += user.usdt_balance;
            stats.total_gbtc += user.gbtc_balance;
            stats.total_unclaimed += user.unclaimed_balance;
        }
        Ok(stats)
    }

    /// Writes the user row with its username and referral index entries in
    /// one transaction. A name claimed by a concurrent registration shows up
    /// here on the retry that follows the write conflict.
    fn create_account(
        &self,
        username: &str,
        access_key_hash: &str,
        referred_by: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<User, AccountError> {
        let code_prefix: String = username.chars().take(REFERRAL_PREFIX_CHARS).collect();

        self.db.transact("register", |tx| {
            if tx.username_owner(username)?.is_some() {
                return Err(AccountError::UsernameTaken);
            }

            let mut user = User::new(
                Uuid::new_v4().to_string(),
                username.to_string(),
                access_key_hash.to_string(),
                chrono::Utc::now().timestamp(),
            );
            user.registration_ip = client_ip.map(str::to_string);
            user.referred_by = referred_by.map(str::to_string);

            let mut code = None;
            let mut rng = rand::thread_rng();
            for _ in 0..REFERRAL_CODE_ATTEMPTS {
                let candidate = format!("{code_prefix}{}", rng.gen_range(0..1000));
                if tx.referral_owner(&candidate)?.is_none() {
                    code = Some(candidate);
                    break;
                }
            }
            // Crowded prefix: fall back to a suffix from the user id.
            let code = code.unwrap_or_else(|| format!("{code_prefix}{}", &user.id[..8]));

            tx.claim_referral_code(&code, &user.id)?;
            tx.claim_username(&user.username, &user.id)?;
            user.referral_code = Some(code);
            tx.put_user(&user)?;
            Ok(user)
        })
    }

    async fn resolve_referrer(&self, code: Option<&str>) -> Result<Option<String>, AccountError> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let referrer = self.db.find_user_id_by_referral_code(code).await?;
        if referrer.is_none() {
            warn!(referral_code = code, "unknown referral code ignored");
        }
        Ok(referrer)
    }
}
