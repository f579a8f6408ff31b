use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{
    cookies::{read_cookie, ACCESS_COOKIE},
    jwt::{JwtKeys, TokenError},
};
use crate::{error::ApiError, state::AppState, users::repo_types::PublicUser};

/// Resolved identity for protected routes: the access token from the
/// `accessToken` cookie or a `Bearer` header, verified and looked up.
#[derive(Debug, Clone)]
pub struct AuthUser(pub PublicUser);

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(token) = read_cookie(&parts.headers, ACCESS_COOKIE) {
        return Some(token);
    }
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|e| {
            warn!(error = %e, "access token rejected");
            match e {
                TokenError::Expired => ApiError::unauthorized("Access token expired"),
                TokenError::Invalid => ApiError::unauthorized("Invalid access token"),
            }
        })?;

        let user = state
            .users
            .find_public_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "access token for unknown user");
                ApiError::unauthorized("Invalid access token")
            })?;

        Ok(AuthUser(user))
    }
}
