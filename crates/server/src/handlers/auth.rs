//! Authentication endpoints.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::codec::MsgPack;
use crate::ctx::Ctx;
use crate::error::{Error, Result};
use crate::state::AppState;
use crate::wire::{LoginChallengeIn, LoginRequest, SignupRequest};

/// GET /api/v1/authentication/is_etebase/
pub async fn is_etebase() -> StatusCode {
    StatusCode::OK
}

/// POST /api/v1/authentication/signup/
pub async fn signup(
    State(state): State<AppState>,
    MsgPack(req): MsgPack<SignupRequest>,
) -> Result<impl IntoResponse> {
    let out = state.auth.signup(&req).await?;
    Ok((StatusCode::CREATED, MsgPack(out)))
}

/// POST /api/v1/authentication/login_challenge/
pub async fn login_challenge(
    State(state): State<AppState>,
    MsgPack(req): MsgPack<LoginChallengeIn>,
) -> Result<impl IntoResponse> {
    let out = state.auth.login_challenge(&req.username).await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/authentication/login/
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    MsgPack(req): MsgPack<LoginRequest>,
) -> Result<impl IntoResponse> {
    let out = state.auth.login(&req, request_host(&headers)).await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/authentication/logout/
pub async fn logout(State(state): State<AppState>, ctx: Ctx) -> Result<StatusCode> {
    state.auth.logout(ctx.token()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/authentication/change_password/
pub async fn change_password(
    State(state): State<AppState>,
    ctx: Ctx,
    headers: HeaderMap,
    MsgPack(req): MsgPack<LoginRequest>,
) -> Result<StatusCode> {
    state
        .auth
        .change_password(ctx.user(), &req, request_host(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/authentication/dashboard_url/
pub async fn dashboard_url() -> Result<StatusCode> {
    Err(Error::NotSupported(
        "This server doesn't have a user dashboard.",
    ))
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
