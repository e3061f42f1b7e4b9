//! MessagePack codec and the axum extractor/response wrappers built on it.
//!
//! Every request body and every non-empty response body on the API is
//! msgpack. Structs are encoded as maps with their field names verbatim so
//! the wire shape matches the protocol exactly; binary fields are tagged
//! with `serde_bytes` at their definition sites so they encode as msgpack
//! `bin`, never `str`.

use axum::{
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;

pub const CONTENT_TYPE: &str = "application/msgpack";

pub fn to_vec<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(data).map_err(|e| {
        let detail = e.to_string();
        if detail.contains("missing field") {
            Error::MissingField(detail)
        } else {
            Error::InvalidRequest(detail)
        }
    })
}

/// Msgpack request body extractor and response wrapper, in the mold of
/// `axum::Json`.
pub struct MsgPack<T>(pub T);

impl<S, T> FromRequest<S> for MsgPack<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        Ok(MsgPack(from_slice(&bytes)?))
    }
}

impl<T: Serialize> IntoResponse for MsgPack<T> {
    fn into_response(self) -> Response {
        match to_vec(&self.0) {
            Ok(packed) => (
                [(header::CONTENT_TYPE, CONTENT_TYPE)],
                packed,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("msgpack response encoding failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// The `{}` body returned by the bulk item write endpoints.
#[derive(Serialize)]
pub struct Empty {}
