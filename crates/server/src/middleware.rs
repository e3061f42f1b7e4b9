//! Token authentication middleware.
//!
//! Every non-auth endpoint requires `Authorization: Token <key>`. The
//! resolved user rides along in the request extensions as a [`Ctx`].

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::ctx::Ctx;
use crate::error::{Error, Result};
use crate::state::AppState;

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("middleware: require_auth");

    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(Error::InvalidToken)?;
    let value = header.to_str().map_err(|_| Error::InvalidToken)?;
    let token = value
        .strip_prefix("Token ")
        .ok_or(Error::InvalidToken)?
        .to_string();

    let user = state.auth.user_by_token(&token).await?;
    req.extensions_mut().insert(Ctx::new(user, token));

    Ok(next.run(req).await)
}
