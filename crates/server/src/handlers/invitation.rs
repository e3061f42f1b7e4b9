//! Invitation endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::codec::MsgPack;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::state::AppState;
use crate::wire::{FetchUserProfileIn, InvitationAcceptIn, InvitationCreateIn};

/// GET /api/v1/invitation/incoming/
pub async fn list_incoming(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<impl IntoResponse> {
    let out = state.invitations.list_incoming(ctx.user_id()).await?;
    Ok(MsgPack(out))
}

/// GET /api/v1/invitation/incoming/{invitation_uid}/
pub async fn get_incoming(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(invitation_uid): Path<String>,
) -> Result<impl IntoResponse> {
    let out = state
        .invitations
        .get_incoming(&invitation_uid, ctx.user_id())
        .await?;
    Ok(MsgPack(out))
}

/// DELETE /api/v1/invitation/incoming/{invitation_uid}/
pub async fn reject_incoming(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(invitation_uid): Path<String>,
) -> Result<StatusCode> {
    state
        .invitations
        .reject(&invitation_uid, ctx.user_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/invitation/incoming/{invitation_uid}/accept/
pub async fn accept_incoming(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(invitation_uid): Path<String>,
    MsgPack(req): MsgPack<InvitationAcceptIn>,
) -> Result<StatusCode> {
    state
        .invitations
        .accept(&invitation_uid, ctx.user_id(), &req)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/invitation/outgoing/
pub async fn list_outgoing(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<impl IntoResponse> {
    let out = state.invitations.list_outgoing(ctx.user_id()).await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/invitation/outgoing/
pub async fn create_outgoing(
    State(state): State<AppState>,
    ctx: Ctx,
    MsgPack(req): MsgPack<InvitationCreateIn>,
) -> Result<StatusCode> {
    state.invitations.create(ctx.user_id(), &req).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/invitation/outgoing/{invitation_uid}/
pub async fn delete_outgoing(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(invitation_uid): Path<String>,
) -> Result<StatusCode> {
    state
        .invitations
        .delete_outgoing(&invitation_uid, ctx.user_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/invitation/outgoing/fetch_user_profile/
pub async fn fetch_user_profile(
    State(state): State<AppState>,
    _ctx: Ctx,
    MsgPack(req): MsgPack<FetchUserProfileIn>,
) -> Result<impl IntoResponse> {
    let out = state.invitations.fetch_user_profile(&req.username).await?;
    Ok(MsgPack(out))
}
