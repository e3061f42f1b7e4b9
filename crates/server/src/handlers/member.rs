//! Membership endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::codec::MsgPack;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::state::AppState;
use crate::wire::MemberModifyIn;

/// GET /api/v1/collection/{collection_uid}/member/
pub async fn list(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
) -> Result<impl IntoResponse> {
    let out = state.members.list(&collection_uid, ctx.user_id()).await?;
    Ok(MsgPack(out))
}

/// PATCH /api/v1/collection/{collection_uid}/member/{username}/
pub async fn modify(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, username)): Path<(String, String)>,
    MsgPack(req): MsgPack<MemberModifyIn>,
) -> Result<StatusCode> {
    state
        .members
        .update_access(&collection_uid, &username, ctx.user_id(), req.access_level)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/collection/{collection_uid}/member/{username}/
pub async fn remove(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, username)): Path<(String, String)>,
) -> Result<StatusCode> {
    state
        .members
        .remove(&collection_uid, &username, ctx.user_id())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/collection/{collection_uid}/member/leave/
pub async fn leave(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
) -> Result<StatusCode> {
    state.members.leave(&collection_uid, ctx.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
