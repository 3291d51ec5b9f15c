use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::DBLayer,
    errors::AppError,
    model::{session::SessionRecord, user::User},
};

pub const SESSION_COOKIE: &str = "session";
/// Absolute lifetime; sessions are never extended.
pub const SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 7;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Authentication required")]
    Missing,
    #[error("Invalid session")]
    Invalid,
    #[error("Session expired")]
    Expired,
    #[error("Invalid session")]
    UserNotFound,
    #[error("Account is banned")]
    Banned,
    #[error("Account is frozen")]
    Frozen,
    #[error("Admin access required")]
    NotAdmin,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Missing
            | SessionError::Invalid
            | SessionError::Expired
            | SessionError::UserNotFound => AppError::Unauthorized(err.to_string()),
            SessionError::Banned | SessionError::Frozen | SessionError::NotAdmin => {
                AppError::Forbidden(err.to_string())
            }
            SessionError::Store(e) => AppError::Internal(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    sid: String,
    iat: i64,
    exp: i64,
}

/// The caller of the current request, with the user row as read for this
/// request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub session_id: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub record: SessionRecord,
}

/// Issues, validates and revokes sessions.
///
/// The token is a signed JWT naming a server-side session row. Validation
/// needs both: a good signature and a live row, so revocation is immediate.
pub struct SessionAuthority {
    db: Arc<DBLayer>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie_secure: bool,
}

impl SessionAuthority {
    pub fn new(db: Arc<DBLayer>, secret: &str, cookie_secure: bool) -> Self {
        Self {
            db,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            cookie_secure,
        }
    }

    pub async fn issue(&self, user_id: &str) -> Result<IssuedSession, SessionError> {
        let now = chrono::Utc::now().timestamp();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_ts: now,
            expires_ts: now + SESSION_TTL_SECS,
        };

        let claims = SessionClaims {
            sub: record.user_id.clone(),
            sid: record.id.clone(),
            iat: record.created_ts,
            exp: record.expires_ts,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionError::Store(anyhow::Error::new(e).context("failed to sign session")))?;

        self.db.save_session(&record).await?;
        info!(user_id, session_id = %record.id, "session issued");

        Ok(IssuedSession { token, record })
    }

    /// Resolves a token to an identity, re-reading the user so moderation
    /// applies from the very next request.
    pub async fn validate(&self, token: &str) -> Result<Identity, SessionError> {
        let claims = self.decode(token, true)?;

        let record = self
            .db
            .load_session(&claims.sid)
            .await?
            .ok_or(SessionError::Expired)?;

        if record.user_id != claims.sub {
            return Err(SessionError::Invalid);
        }
        if !record.is_live(chrono::Utc::now().timestamp()) {
            return Err(SessionError::Expired);
        }

        let user = self
            .db
            .load_user(&record.user_id)
            .await?
            .ok_or(SessionError::UserNotFound)?;

        if user.is_banned {
            return Err(SessionError::Banned);
        }
        if user.is_frozen {
            return Err(SessionError::Frozen);
        }

        Ok(Identity {
            session_id: record.id,
            user,
        })
    }

    /// Second gate, only meaningful on an identity that passed `validate`.
    pub fn require_admin(&self, identity: &Identity) -> Result<(), SessionError> {
        if identity.user.is_admin() {
            Ok(())
        } else {
            Err(SessionError::NotAdmin)
        }
    }

    /// Ends the session named by `token`. Expired tokens are still accepted
    /// so a stale cookie can be logged out. Returns whether a row was removed.
    pub async fn revoke(&self, token: &str) -> Result<bool, SessionError> {
        let claims = self.decode(token, false)?;
        let existed = self.db.load_session(&claims.sid).await?.is_some();
        if existed {
            self.db.delete_session(&claims.sid).await?;
            info!(user_id = %claims.sub, session_id = %claims.sid, "session revoked");
        }
        Ok(existed)
    }

    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(SESSION_TTL_SECS))
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::ZERO)
            .build()
    }

    fn decode(&self, token: &str, check_expiry: bool) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;

        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => SessionError::Expired,
                _ => {
                    debug!(error = %e, "rejected session token");
                    SessionError::Invalid
                }
            })
    }
}
