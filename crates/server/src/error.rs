//! Protocol error type.
//!
//! Every error a handler can surface carries a stable wire code, a human
//! detail, and an HTTP status. The codes and detail strings are part of the
//! protocol; clients match on them, so they must stay stable. Errors are
//! serialized as MessagePack bodies by the `IntoResponse` impl; anything
//! internal (database, I/O) becomes a bare 500 with no body so server
//! detail never leaks to clients.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::codec;

#[derive(Debug)]
pub enum Error {
    // Authentication
    UserNotFound,
    UserNotInit,
    BadSignature,
    InvalidToken,
    WrongAction { expected: String },
    ChallengeExpired,
    WrongUser,
    WrongHost { expected: String, got: String },
    UserExists,

    // Sync
    BadStoken,
    StaleStoken,
    WrongEtag { expected: String, got: String },
    UniqueUid,

    // Permissions
    AdminRequired(&'static str),
    NoWriteAccess,
    NotMember,

    // Chunks
    ChunkExists,
    ChunkNoContent,

    // Invitations
    NoSelfInvite,
    InvitationExists,
    AlreadyMember,

    // Feature gates
    NotSupported(&'static str),

    // Request shape
    Validation { field: &'static str, detail: String },
    MissingField(String),
    InvalidRequest(String),

    // Internal; never serialized to the client
    Database(sqlx::Error),
    Internal(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn admin_required() -> Self {
        Error::AdminRequired("Only collection admins can perform this operation.")
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::UserNotFound => "user_not_found",
            Error::UserNotInit => "user_not_init",
            Error::BadSignature => "login_bad_signature",
            Error::InvalidToken => "invalid_token",
            Error::WrongAction { .. } => "wrong_action",
            Error::ChallengeExpired => "challenge_expired",
            Error::WrongUser => "wrong_user",
            Error::WrongHost { .. } => "wrong_host",
            Error::UserExists => "user_exists",
            Error::BadStoken => "bad_stoken",
            Error::StaleStoken => "stale_stoken",
            Error::WrongEtag { .. } => "wrong_etag",
            Error::UniqueUid => "unique_uid",
            Error::AdminRequired(_) => "admin_access_required",
            Error::NoWriteAccess => "no_write_access",
            Error::NotMember => "not_member",
            Error::ChunkExists => "chunk_exists",
            Error::ChunkNoContent => "chunk_no_content",
            Error::NoSelfInvite => "no_self_invite",
            Error::InvitationExists => "invitation_exists",
            Error::AlreadyMember => "already_member",
            Error::NotSupported(_) => "not_supported",
            Error::Validation { .. } => "validation_error",
            Error::MissingField(_) => "missing_field",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Database(_) | Error::Internal(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::UserNotFound
            | Error::UserNotInit
            | Error::BadSignature
            | Error::InvalidToken => StatusCode::UNAUTHORIZED,

            Error::WrongAction { .. }
            | Error::ChallengeExpired
            | Error::WrongUser
            | Error::WrongHost { .. }
            | Error::BadStoken
            | Error::ChunkNoContent
            | Error::NoSelfInvite
            | Error::Validation { .. }
            | Error::MissingField(_)
            | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            Error::UserExists
            | Error::StaleStoken
            | Error::WrongEtag { .. }
            | Error::UniqueUid
            | Error::ChunkExists
            | Error::InvitationExists
            | Error::AlreadyMember => StatusCode::CONFLICT,

            Error::AdminRequired(_) | Error::NoWriteAccess | Error::NotMember => {
                StatusCode::FORBIDDEN
            }

            Error::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,

            Error::Database(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Error::UserNotFound => "User not found".into(),
            Error::UserNotInit => "User not properly init".into(),
            Error::BadSignature => "Wrong password for user.".into(),
            Error::InvalidToken => "Invalid token".into(),
            Error::WrongAction { expected } => {
                format!("Expected \"{expected}\" but got something else")
            }
            Error::ChallengeExpired => "Login challenge has expired".into(),
            Error::WrongUser => "This challenge is for the wrong user".into(),
            Error::WrongHost { expected, got } => {
                format!("Found wrong host name. Got: \"{got}\" expected: \"{expected}\"")
            }
            Error::UserExists => "User already exists".into(),
            Error::BadStoken => "Invalid stoken.".into(),
            Error::StaleStoken => "Stoken is too old".into(),
            Error::WrongEtag { expected, got } => {
                format!("Wrong etag. Expected {expected} got {got}")
            }
            Error::UniqueUid => "Collection with this uid already exists".into(),
            Error::AdminRequired(detail) => (*detail).into(),
            Error::NoWriteAccess => "You need write access to write to this collection".into(),
            Error::NotMember => "You are not a member of this collection".into(),
            Error::ChunkExists => "Chunk already exists.".into(),
            Error::ChunkNoContent => "Tried to create a new chunk without content".into(),
            Error::NoSelfInvite => "Inviting yourself is not allowed".into(),
            Error::InvitationExists => "Invitation already exists".into(),
            Error::AlreadyMember => "User is already a member of this collection".into(),
            Error::NotSupported(detail) => (*detail).into(),
            Error::Validation { detail, .. } => detail.clone(),
            Error::MissingField(detail) | Error::InvalidRequest(detail) => detail.clone(),
            Error::Database(_) | Error::Internal(_) => "Internal server error".into(),
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            Error::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Wire form of an error, serialized as msgpack.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorBody>>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(e) => {
                tracing::error!("database error: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            Error::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            _ => {}
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            detail: self.detail(),
            field: self.field().map(str::to_string),
            errors: None,
        };

        match codec::to_vec(&body) {
            Ok(packed) => (
                self.status(),
                [(header::CONTENT_TYPE, codec::CONTENT_TYPE)],
                packed,
            )
                .into_response(),
            Err(_) => self.status().into_response(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e)
    }
}

impl From<etebase_blob::StoreError> for Error {
    fn from(e: etebase_blob::StoreError) -> Self {
        match e {
            etebase_blob::StoreError::Exists => Error::ChunkExists,
            etebase_blob::StoreError::Empty => Error::ChunkNoContent,
            etebase_blob::StoreError::Io(io) => Error::Internal(io.into()),
        }
    }
}
