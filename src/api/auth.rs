use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use axum_extra::extract::CookieJar;
use headers::{authorization::Bearer, Authorization, HeaderMapExt};

use crate::{
    app::AppState,
    auth::session::{Identity, SessionError, SESSION_COOKIE},
    errors::AppError,
};

/// Caller with a live session. Ban and freeze are already enforced.
pub struct AuthenticatedUser(pub Identity);

/// Caller with a live session and the admin role.
pub struct AdminUser(pub Identity);

/// Best-effort client address for audit fields.
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(SessionError::Missing)?;
        let identity = state.sessions.validate(&token).await?;
        Ok(AuthenticatedUser(identity))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(identity) = AuthenticatedUser::from_request_parts(parts, state).await?;
        state.sessions.require_admin(&identity)?;
        Ok(AdminUser(identity))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(forwarded_ip(&parts.headers).or(peer)))
    }
}

/// Session token from the `session` cookie, else from `Authorization: Bearer`.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE).filter(|c| !c.value().is_empty()) {
        return Some(cookie.value().to_string());
    }

    let Authorization(bearer) = headers.typed_get::<Authorization<Bearer>>()?;
    Some(bearer.token().to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
    {
        return Some(first);
    }
    header("x-real-ip")
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}
