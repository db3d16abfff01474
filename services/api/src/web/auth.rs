//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for signup, login, logout and password reset.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tutoring_core::NewProfile;
use utoipa::ToSchema;

use crate::web::middleware::session_token;
use crate::web::rest::{success, Failure};
use crate::web::state::AppState;

/// How long the browser keeps the session cookie.
const SESSION_DAYS: i64 = 30;

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone_number: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

fn session_cookie(token: &str) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        token,
        Duration::days(SESSION_DAYS).num_seconds()
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create an account and its student profile
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created; sets the session cookie"),
        (status = 400, description = "Invalid email, weak password or missing name"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, Failure> {
    if req.name.trim().is_empty() {
        return Err(Failure::bad_request("Name is required"));
    }

    // 1. Create the credentials
    let session = state.auth.sign_up(&req.email, &req.password).await?;

    // 2. Create the profile the rest of the marketplace reads
    let profile = state
        .market
        .create_profile(
            &session.uid,
            NewProfile {
                email: req.email,
                name: req.name,
                phone_number: req.phone_number,
            },
        )
        .await
        .map_err(|e| {
            error!("Account {} created without a profile: {:?}", session.uid, e);
            Failure::from(e)
        })?;
    info!(uid = %profile.id, "user signed up");

    // 3. Return the profile with the session cookie
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, session_cookie(&session.token))],
        success(json!({ "uid": session.uid, "token": session.token, "profile": profile })),
    ))
}

/// POST /auth/login - Login with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; sets the session cookie"),
        (status = 401, description = "Unknown user or wrong password")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, Failure> {
    let session = state.auth.sign_in(&req.email, &req.password).await?;
    let profile = state.market.get_profile(&session.uid).await?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&session.token))],
        success(json!({ "uid": session.uid, "token": session.token, "profile": profile })),
    ))
}

/// POST /auth/logout - Logout and invalidate the token
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, Failure> {
    let token = session_token(&headers).ok_or_else(Failure::unauthenticated)?;
    state.auth.sign_out(token).await?;

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.to_string())],
        success(json!({})),
    ))
}

/// POST /auth/password-reset - Request a password reset email
#[utoipa::path(
    post,
    path = "/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset requested"),
        (status = 400, description = "Invalid email"),
        (status = 401, description = "No account with this email")
    )
)]
pub async fn password_reset_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, Failure> {
    state.auth.send_password_reset(&req.email).await?;
    Ok(success(json!({})))
}
