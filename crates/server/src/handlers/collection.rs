//! Collection endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::codec::MsgPack;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::handlers::ListQuery;
use crate::services::collection::clamp_limit;
use crate::state::AppState;
use crate::wire::{CollectionCreateIn, ListMultiIn};

/// GET /api/v1/collection/
pub async fn list(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    let out = state
        .collections
        .list(
            ctx.user_id(),
            query.stoken.as_deref(),
            clamp_limit(query.limit),
            None,
        )
        .await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/collection/list_multi/
pub async fn list_multi(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): Query<ListQuery>,
    MsgPack(req): MsgPack<ListMultiIn>,
) -> Result<impl IntoResponse> {
    let types: Vec<Vec<u8>> = req
        .collection_types
        .into_iter()
        .map(|b| b.into_vec())
        .collect();
    let out = state
        .collections
        .list(
            ctx.user_id(),
            query.stoken.as_deref(),
            clamp_limit(query.limit),
            Some(&types),
        )
        .await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/collection/
pub async fn create(
    State(state): State<AppState>,
    ctx: Ctx,
    MsgPack(req): MsgPack<CollectionCreateIn>,
) -> Result<impl IntoResponse> {
    let out = state.collections.create(ctx.user_id(), &req).await?;
    Ok((StatusCode::CREATED, MsgPack(out)))
}

/// GET /api/v1/collection/{collection_uid}/
pub async fn get(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
) -> Result<impl IntoResponse> {
    let out = state.collections.get(ctx.user_id(), &collection_uid).await?;
    Ok(MsgPack(out))
}
