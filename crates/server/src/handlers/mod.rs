//! HTTP handlers. Thin by design: parse the request, call a service,
//! format the response.

pub mod auth;
pub mod chunk;
pub mod collection;
pub mod health;
pub mod invitation;
pub mod item;
pub mod member;
pub mod ws;

use serde::Deserialize;

/// Query parameters shared by the stoken-paginated list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub stoken: Option<String>,
    pub limit: Option<i64>,
}

/// Query parameters for the revision history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct RevisionQuery {
    pub iterator: Option<String>,
    pub limit: Option<i64>,
}
