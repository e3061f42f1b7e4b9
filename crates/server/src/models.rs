//! Row types for the synchronization schema.
//!
//! Table and column names match the reference database layout
//! (`myauth_user`, `django_stoken`, `django_collection*`, ...) so an
//! existing database can be reused as-is. All binary columns are opaque
//! ciphertext or public-key material; the server never interprets them.

use serde::{de, Deserialize, Serialize};
use sqlx::FromRow;

/// A user account. `username` and `email` are stored lowercased for
/// case-insensitive lookups; `first_name` preserves the signup casing of
/// the username for display.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub is_active: bool,
}

/// Per-user cryptographic profile, 1:1 with [`User`].
#[derive(Debug, Clone, FromRow)]
pub struct UserInfo {
    pub owner_id: i64,
    pub version: i64,
    #[sqlx(rename = "loginPubkey")]
    pub login_pubkey: Vec<u8>,
    pub pubkey: Vec<u8>,
    #[sqlx(rename = "encryptedContent")]
    pub encrypted_content: Vec<u8>,
    pub salt: Vec<u8>,
}

/// A sync token: one row per mutation visible to the sync engine. The
/// monotonic `id` is the global ordering; only the opaque `uid` crosses the
/// wire.
#[derive(Debug, Clone, FromRow)]
pub struct Stoken {
    pub id: i64,
    pub uid: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Collection {
    pub id: i64,
    pub uid: String,
    pub owner_id: i64,
    pub main_item_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CollectionItem {
    pub id: i64,
    pub uid: String,
    pub collection_id: i64,
    pub version: i64,
}

/// One revision of an item. At most one revision per item has
/// `current = Some(true)`; historical rows carry `current = NULL` so the
/// `(item_id, current)` unique index admits any number of them.
#[derive(Debug, Clone, FromRow)]
pub struct CollectionItemRevision {
    pub id: i64,
    pub uid: String,
    pub item_id: i64,
    pub stoken_id: i64,
    pub meta: Vec<u8>,
    pub current: Option<bool>,
    pub deleted: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct CollectionMember {
    pub id: i64,
    pub collection_id: i64,
    pub user_id: i64,
    pub stoken_id: Option<i64>,
    #[sqlx(rename = "encryptionKey")]
    pub encryption_key: Vec<u8>,
    pub collection_type_id: Option<i64>,
    #[sqlx(rename = "accessLevel")]
    pub access_level: AccessLevel,
}

impl CollectionMember {
    pub fn is_admin(&self) -> bool {
        self.access_level == AccessLevel::Admin
    }

    pub fn can_write(&self) -> bool {
        matches!(self.access_level, AccessLevel::Admin | AccessLevel::ReadWrite)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CollectionInvitation {
    pub id: i64,
    pub uid: String,
    pub version: i64,
    #[sqlx(rename = "fromMember_id")]
    pub from_member_id: i64,
    pub user_id: i64,
    #[sqlx(rename = "signedEncryptionKey")]
    pub signed_encryption_key: Vec<u8>,
    #[sqlx(rename = "accessLevel")]
    pub access_level: AccessLevel,
}

/// Access level of a collection member. The numeric values are persisted;
/// the wire form is the name string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum AccessLevel {
    ReadOnly = 0,
    Admin = 1,
    ReadWrite = 2,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::ReadOnly => "readOnly",
            AccessLevel::Admin => "admin",
            AccessLevel::ReadWrite => "readWrite",
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(AccessLevel::ReadOnly),
            1 => Some(AccessLevel::Admin),
            2 => Some(AccessLevel::ReadWrite),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "readOnly" => Some(AccessLevel::ReadOnly),
            "admin" => Some(AccessLevel::Admin),
            "readWrite" => Some(AccessLevel::ReadWrite),
            _ => None,
        }
    }
}

impl Serialize for AccessLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Accepts both the name string and the numeric form; clients have shipped
/// both encodings.
impl<'de> Deserialize<'de> for AccessLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = AccessLevel;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("an access level name or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<AccessLevel, E> {
                AccessLevel::from_name(v)
                    .ok_or_else(|| E::custom(format!("unknown access level \"{v}\"")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<AccessLevel, E> {
                AccessLevel::from_i64(v as i64)
                    .ok_or_else(|| E::custom(format!("unknown access level {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<AccessLevel, E> {
                AccessLevel::from_i64(v)
                    .ok_or_else(|| E::custom(format!("unknown access level {v}")))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
