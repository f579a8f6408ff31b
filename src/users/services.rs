//! Account use cases: registration, the login/refresh/logout token
//! lifecycle, profile mutation and the aggregated reads.
//!
//! Exactly one refresh token is valid per user at any time: the one stored on
//! the user row. Login and refresh overwrite it, logout clears it.

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, LoginRequest, LoginResponse, RegisterInput, TokenPair,
    UpdateProfileRequest,
};
use super::repo_types::{ChannelProfile, NewUser, ProfileUpdate, PublicUser, User, WatchedVideo};
use crate::{
    auth::{
        jwt::{JwtKeys, TokenError},
        password::{hash_password, verify_password},
    },
    error::ApiError,
    state::AppState,
    uploads::{upload_asset, AssetKind, UploadItem},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn issue_tokens(keys: &JwtKeys, user: &User) -> Result<TokenPair, ApiError> {
    let sign = || -> anyhow::Result<TokenPair> {
        Ok(TokenPair {
            access_token: keys.sign_access(user)?,
            refresh_token: keys.sign_refresh(user.id)?,
        })
    };
    sign().map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt signing failed");
        ApiError::Internal("Something went wrong while generating tokens".into())
    })
}

async fn upload(st: &AppState, kind: AssetKind, item: UploadItem, failure: &str) -> Result<String, ApiError> {
    upload_asset(st.storage.as_ref(), kind, item).await.map_err(|e| {
        error!(error = ?e, ?kind, "asset upload failed");
        ApiError::bad_request(failure)
    })
}

pub async fn register(st: &AppState, input: RegisterInput) -> Result<PublicUser, ApiError> {
    let required = [&input.full_name, &input.email, &input.user_name, &input.password];
    if required.iter().any(|v| v.trim().is_empty()) {
        return Err(ApiError::bad_request("All fields are required"));
    }

    let user_name = normalize(&input.user_name);
    let email = normalize(&input.email);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::bad_request("Invalid email"));
    }

    if st
        .users
        .find_by_handle_or_email(Some(&user_name), Some(&email))
        .await?
        .is_some()
    {
        warn!(%user_name, %email, "handle or email already registered");
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }

    let avatar = input
        .avatar
        .ok_or_else(|| ApiError::bad_request("Avatar file is required"))?;
    let avatar = upload(st, AssetKind::Avatar, avatar, "Avatar file is required").await?;
    let cover_image = match input.cover_image {
        Some(item) => Some(upload(st, AssetKind::Cover, item, "Error while uploading cover image").await?),
        None => None,
    };

    let password_hash = hash_password(&input.password)?;
    let user = st
        .users
        .create(NewUser {
            user_name,
            email,
            full_name: input.full_name.trim().to_string(),
            avatar,
            cover_image,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, user_name = %user.user_name, "user registered");
    Ok(PublicUser::from(&user))
}

pub async fn login(st: &AppState, req: LoginRequest) -> Result<LoginResponse, ApiError> {
    let user_name = non_blank(req.user_name).map(|v| v.to_lowercase());
    let email = non_blank(req.email).map(|v| v.to_lowercase());
    if user_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("userName or email is required"));
    }

    let user = st
        .users
        .find_by_handle_or_email(user_name.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?user_name, ?email, "login for unknown user");
            ApiError::not_found("User not found")
        })?;

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::bad_request("Invalid login credentials"));
    }

    let keys = JwtKeys::from_ref(st);
    let tokens = issue_tokens(&keys, &user)?;
    st.users
        .update_refresh_token(user.id, Some(&tokens.refresh_token))
        .await?;

    info!(user_id = %user.id, "user logged in");
    Ok(LoginResponse {
        user: PublicUser::from(&user),
        tokens,
    })
}

pub async fn logout(st: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    st.users.update_refresh_token(user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Trades the current refresh token for a new pair. The presented token must
/// equal the stored one; the swap itself is conditional so a token can win at
/// most one rotation.
pub async fn refresh(st: &AppState, presented: Option<String>) -> Result<TokenPair, ApiError> {
    let token = non_blank(presented).ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(st);
    let claims = keys.verify_refresh(&token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        match e {
            TokenError::Expired => ApiError::unauthorized("Refresh token expired"),
            TokenError::Invalid => ApiError::unauthorized("Invalid refresh token"),
        }
    })?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    let reused = || {
        warn!(user_id = %user.id, "refresh token does not match stored token");
        ApiError::unauthorized("Refresh token is expired or used")
    };
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        return Err(reused());
    }

    let tokens = issue_tokens(&keys, &user)?;
    if !st
        .users
        .replace_refresh_token(user.id, &token, &tokens.refresh_token)
        .await?
    {
        return Err(reused());
    }

    info!(user_id = %user.id, "tokens refreshed");
    Ok(tokens)
}

pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> Result<PublicUser, ApiError> {
    let full_name = non_blank(req.full_name);
    let email = non_blank(req.email).map(|v| v.to_lowercase());
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("fullName or email is required"));
    }
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(ApiError::bad_request("Invalid email"));
        }
    }

    let user = st
        .users
        .update_profile(user_id, ProfileUpdate { full_name, email })
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    info!(%user_id, "profile updated");
    Ok(user)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), ApiError> {
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(&req.old_password, &user.password_hash)? {
        warn!(%user_id, "change password with wrong old password");
        return Err(ApiError::bad_request("Invalid old password"));
    }
    if req.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("New password is required"));
    }

    let hash = hash_password(&req.new_password)?;
    st.users.update_password(user_id, &hash).await?;
    info!(%user_id, "password changed");
    Ok(())
}

pub async fn update_avatar(
    st: &AppState,
    user_id: Uuid,
    file: Option<UploadItem>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::bad_request("Avatar file is missing"))?;
    let url = upload(st, AssetKind::Avatar, file, "Error while uploading avatar").await?;
    st.users
        .update_avatar(user_id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn update_cover(
    st: &AppState,
    user_id: Uuid,
    file: Option<UploadItem>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::bad_request("Cover image file is missing"))?;
    let url = upload(st, AssetKind::Cover, file, "Error while uploading cover image").await?;
    st.users
        .update_cover(user_id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn channel_profile(
    st: &AppState,
    user_name: &str,
    viewer: Uuid,
) -> Result<ChannelProfile, ApiError> {
    let user_name = normalize(user_name);
    if user_name.is_empty() {
        return Err(ApiError::bad_request("userName is missing"));
    }
    st.users
        .channel_profile(&user_name, viewer)
        .await?
        .ok_or_else(|| ApiError::not_found("Channel does not exist"))
}

pub async fn watch_history(st: &AppState, user_id: Uuid) -> Result<Vec<WatchedVideo>, ApiError> {
    st.users
        .watch_history(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}
