use std::collections::HashMap;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, FromRef, Multipart, Path,
        State,
    },
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::instrument;

use super::{
    dto::{
        ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, RegisterInput,
        TokenPair, UpdateProfileRequest,
    },
    repo_types::{ChannelProfile, PublicUser, WatchedVideo},
    services,
};
use crate::{
    auth::{
        cookies::{expired_cookie, read_cookie, session_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
        extractors::AuthUser,
        jwt::JwtKeys,
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    uploads::UploadItem,
};

const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/user/login", post(login))
        .route("/user/logout", post(logout))
        .route("/user/refreshToken", post(refresh_token))
        .route("/user/update", post(update_profile))
        .route("/user/update/password", post(change_password))
        .route("/user/current", get(current_user))
        .route("/user/getWatchHistory", get(watch_history))
        .route("/c/:user_name", get(channel_profile))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(register))
        .route("/user/update/avatar", post(update_avatar))
        .route("/user/update/coverImage", post(update_cover))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
}

#[derive(Default)]
struct FormParts {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadItem>,
}

impl FormParts {
    fn field(&mut self, name: &str) -> String {
        self.fields.remove(name).unwrap_or_default()
    }
}

async fn read_form(mp: Result<Multipart, MultipartRejection>) -> Result<FormParts, ApiError> {
    let mut mp = mp?;
    let mut form = FormParts::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            if !body.is_empty() {
                form.files.insert(name, UploadItem { body, content_type });
            }
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            form.fields.insert(name, text);
        }
    }
    Ok(form)
}

fn session_cookies(state: &AppState, tokens: &TokenPair) -> Result<HeaderMap, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let secure = state.config.cookie_secure;
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        session_cookie(ACCESS_COOKIE, &tokens.access_token, keys.access_ttl, secure)?,
    );
    headers.append(
        SET_COOKIE,
        session_cookie(REFRESH_COOKIE, &tokens.refresh_token, keys.refresh_ttl, secure)?,
    );
    Ok(headers)
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = read_form(mp).await?;
    let input = RegisterInput {
        full_name: form.field("fullName"),
        email: form.field("email"),
        user_name: form.field("userName"),
        password: form.field("password"),
        avatar: form.files.remove("avatar"),
        cover_image: form.files.remove("coverImage"),
    };
    let user = services::register(&state, input).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(HeaderMap, ApiResponse<LoginResponse>), ApiError> {
    let Json(req) = payload?;
    let res = services::login(&state, req).await?;
    let headers = session_cookies(&state, &res.tokens)?;
    Ok((headers, ApiResponse::ok(res, "User logged in successfully")))
}

#[instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<(HeaderMap, ApiResponse<Value>), ApiError> {
    services::logout(&state, user.0.id).await?;
    let secure = state.config.cookie_secure;
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, expired_cookie(ACCESS_COOKIE, secure));
    headers.append(SET_COOKIE, expired_cookie(REFRESH_COOKIE, secure));
    Ok((headers, ApiResponse::ok(json!({}), "User logged out successfully")))
}

/// Accepts the refresh token from the `refreshToken` cookie, falling back to
/// a JSON body. A missing or unparsable body is treated as "no token".
#[instrument(skip(state, headers, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<(HeaderMap, ApiResponse<TokenPair>), ApiError> {
    let presented = read_cookie(&headers, REFRESH_COOKIE)
        .or_else(|| payload.ok().and_then(|Json(body)| body.refresh_token));
    let tokens = services::refresh(&state, presented).await?;
    let cookies = session_cookies(&state, &tokens)?;
    Ok((cookies, ApiResponse::ok(tokens, "Access token refreshed")))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let Json(req) = payload?;
    let updated = services::update_profile(&state, user.0.id, req).await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.0.id))]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<Value>, ApiError> {
    let Json(req) = payload?;
    services::change_password(&state, user.0.id, req).await?;
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

pub async fn current_user(AuthUser(user): AuthUser) -> ApiResponse<PublicUser> {
    ApiResponse::ok(user, "Current user fetched successfully")
}

#[instrument(skip(state, user, mp), fields(user_id = %user.0.id))]
pub async fn update_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = read_form(mp).await?;
    let updated = services::update_avatar(&state, user.0.id, form.files.remove("avatar")).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

#[instrument(skip(state, user, mp), fields(user_id = %user.0.id))]
pub async fn update_cover(
    State(state): State<AppState>,
    user: AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = read_form(mp).await?;
    let updated = services::update_cover(&state, user.0.id, form.files.remove("coverImage")).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

#[instrument(skip(state, user), fields(viewer = %user.0.id))]
pub async fn channel_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_name): Path<String>,
) -> Result<ApiResponse<ChannelProfile>, ApiError> {
    let profile = services::channel_profile(&state, &user_name, user.0.id).await?;
    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}

#[instrument(skip(state, user), fields(user_id = %user.0.id))]
pub async fn watch_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<ApiResponse<Vec<WatchedVideo>>, ApiError> {
    let history = services::watch_history(&state, user.0.id).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}
