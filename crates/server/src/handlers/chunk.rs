//! Chunk endpoints. Unlike the rest of the API these carry raw bytes, not
//! msgpack: the upload body is the chunk itself and the download body is
//! an octet-stream.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;

use crate::ctx::Ctx;
use crate::error::Result;
use crate::state::AppState;

/// PUT /api/v1/collection/{collection_uid}/item/{item_uid}/chunk/{chunk_uid}/
pub async fn upload(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, _item_uid, chunk_uid)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<StatusCode> {
    state
        .chunks
        .upload(&collection_uid, &chunk_uid, ctx.user_id(), &body)
        .await?;
    Ok(StatusCode::CREATED)
}

/// GET /api/v1/collection/{collection_uid}/item/{item_uid}/chunk/{chunk_uid}/download/
pub async fn download(
    State(state): State<AppState>,
    ctx: Ctx,
    Path((collection_uid, _item_uid, chunk_uid)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    let data = state
        .chunks
        .download(&collection_uid, &chunk_uid, ctx.user_id())
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}
