//! Per-request authentication context, injected by the auth middleware and
//! extracted by handlers.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::{Error, Result};
use crate::models::User;

#[derive(Clone, Debug)]
pub struct Ctx {
    user: User,
    token: String,
}

impl Ctx {
    pub fn new(user: User, token: String) -> Self {
        Self { user, token }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Ctx>()
            .cloned()
            .ok_or(Error::InvalidToken)
    }
}
