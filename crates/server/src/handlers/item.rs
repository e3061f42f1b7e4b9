//! Item endpoints: listing, history, and the two bulk write paths.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::codec::{Empty, MsgPack};
use crate::ctx::Ctx;
use crate::error::Result;
use crate::handlers::{ListQuery, RevisionQuery};
use crate::services::collection::clamp_limit;
use crate::state::AppState;
use crate::wire::{FetchUpdatesIn, ItemBatchIn, ItemTransactionIn};

/// GET /api/v1/collection/{collection_uid}/item/
pub async fn list(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    let out = state
        .items
        .list(
            &collection_uid,
            ctx.user_id(),
            query.stoken.as_deref(),
            clamp_limit(query.limit),
        )
        .await?;
    Ok(MsgPack(out))
}

/// GET /api/v1/collection/{collection_uid}/item/{item_uid}/
pub async fn get(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, item_uid)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let out = state
        .items
        .get(&collection_uid, &item_uid, ctx.user_id())
        .await?;
    Ok(MsgPack(out))
}

/// GET /api/v1/collection/{collection_uid}/item/{item_uid}/revision/
pub async fn revisions(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, item_uid)): Path<(String, String)>,
    Query(query): Query<RevisionQuery>,
) -> Result<impl IntoResponse> {
    let out = state
        .items
        .revisions(
            &collection_uid,
            &item_uid,
            ctx.user_id(),
            query.iterator.as_deref(),
            clamp_limit(query.limit),
        )
        .await?;
    Ok(MsgPack(out))
}

/// POST /api/v1/collection/{collection_uid}/item/batch/
pub async fn batch(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
    MsgPack(req): MsgPack<ItemBatchIn>,
) -> Result<impl IntoResponse> {
    state
        .items
        .batch(&collection_uid, ctx.user_id(), &req.items)
        .await?;
    Ok(MsgPack(Empty {}))
}

/// POST /api/v1/collection/{collection_uid}/item/transaction/
pub async fn transaction(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
    MsgPack(req): MsgPack<ItemTransactionIn>,
) -> Result<impl IntoResponse> {
    state
        .items
        .transaction(&collection_uid, ctx.user_id(), &req.items, req.deps.as_ref())
        .await?;
    Ok(MsgPack(Empty {}))
}

/// POST /api/v1/collection/{collection_uid}/item/fetch_updates/
pub async fn fetch_updates(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
    MsgPack(req): MsgPack<FetchUpdatesIn>,
) -> Result<impl IntoResponse> {
    let out = state
        .items
        .fetch_updates(&collection_uid, ctx.user_id(), &req)
        .await?;
    Ok(MsgPack(out))
}
