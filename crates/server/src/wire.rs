//! Request and response body shapes.
//!
//! Field names are the wire protocol; serde renames keep the Rust side
//! snake_case while the msgpack maps carry the exact reference names.
//! Binary payloads (salts, keys, ciphertext, signatures) are `serde_bytes`
//! so they encode as msgpack `bin`.

use serde::{Deserialize, Serialize};

use crate::models::AccessLevel;

// ---------------------------------------------------------------------------
// Authentication

#[derive(Debug, Deserialize)]
pub struct LoginChallengeIn {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginChallengeOut {
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
    pub version: i64,
}

/// The signed envelope used by login and change-password.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(with = "serde_bytes")]
    pub response: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Decoded contents of [`LoginRequest::response`]. The trailing pair is
/// only present for `changePassword`.
#[derive(Debug, Deserialize)]
pub struct LoginResponseData {
    pub username: String,
    #[serde(with = "serde_bytes")]
    pub challenge: Vec<u8>,
    pub host: String,
    pub action: String,
    #[serde(rename = "loginPubkey", with = "serde_bytes", default)]
    pub login_pubkey: Option<Vec<u8>>,
    #[serde(rename = "encryptedContent", with = "serde_bytes", default)]
    pub encrypted_content: Option<Vec<u8>>,
}

/// Server-issued challenge plaintext. Decoding goes through `rmpv` so the
/// integers may come back in any width a client library chose.
#[derive(Debug, Serialize)]
pub struct ChallengeData {
    pub timestamp: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SignupUser {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub user: SignupUser,
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(rename = "loginPubkey", with = "serde_bytes")]
    pub login_pubkey: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(rename = "encryptedContent", with = "serde_bytes")]
    pub encrypted_content: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub username: String,
    pub email: String,
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(rename = "encryptedContent", with = "serde_bytes")]
    pub encrypted_content: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct LoginOut {
    pub token: String,
    pub user: UserOut,
}

// ---------------------------------------------------------------------------
// Collections & items

#[derive(Debug, Serialize)]
pub struct ChunkRef {
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct ContentOut {
    pub uid: String,
    #[serde(with = "serde_bytes")]
    pub meta: Vec<u8>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<ChunkRef>>,
}

#[derive(Debug, Serialize)]
pub struct ItemOut {
    pub uid: String,
    pub version: i64,
    /// The current revision's UID; the precondition for transactional
    /// writes.
    pub etag: String,
    pub content: ContentOut,
}

#[derive(Debug, Serialize)]
pub struct CollectionOut {
    pub item: ItemOut,
    #[serde(rename = "accessLevel")]
    pub access_level: AccessLevel,
    pub stoken: String,
}

#[derive(Debug, Serialize)]
pub struct RemovedOut {
    pub uid: String,
}

#[derive(Debug, Serialize)]
pub struct CollectionListOut {
    pub data: Vec<CollectionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoken: Option<String>,
    pub done: bool,
    #[serde(rename = "removedMemberships", skip_serializing_if = "Option::is_none")]
    pub removed_memberships: Option<Vec<RemovedOut>>,
}

#[derive(Debug, Serialize)]
pub struct ItemListOut {
    pub data: Vec<ItemOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stoken: Option<String>,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct ContentIn {
    pub uid: String,
    #[serde(with = "serde_bytes")]
    pub meta: Vec<u8>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ItemWrite {
    pub uid: String,
    pub version: i64,
    #[serde(default)]
    pub etag: Option<String>,
    pub content: ContentIn,
}

#[derive(Debug, Deserialize)]
pub struct Deps {
    #[serde(default)]
    pub stoken: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemBatchIn {
    pub items: Vec<ItemWrite>,
}

#[derive(Debug, Deserialize)]
pub struct ItemTransactionIn {
    pub items: Vec<ItemWrite>,
    #[serde(default)]
    pub deps: Option<Deps>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionCreateIn {
    /// Opaque collection-type bytes, get-or-created for the owner.
    #[serde(rename = "collectionType", with = "serde_bytes", default)]
    pub collection_type: Option<Vec<u8>>,
    /// The owner's per-member encrypted collection key.
    #[serde(rename = "collectionKey", with = "serde_bytes")]
    pub collection_key: Vec<u8>,
    pub item: ItemWrite,
}

#[derive(Debug, Deserialize)]
pub struct ListMultiIn {
    #[serde(rename = "collectionTypes")]
    pub collection_types: Vec<serde_bytes::ByteBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ItemFetchIn {
    pub uid: String,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchUpdatesIn {
    pub items: Vec<ItemFetchIn>,
}

#[derive(Debug, Serialize)]
pub struct FetchUpdatesOut {
    pub data: Vec<ItemOut>,
}

#[derive(Debug, Serialize)]
pub struct RevisionOut {
    pub uid: String,
    #[serde(with = "serde_bytes")]
    pub meta: Vec<u8>,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct RevisionListOut {
    pub data: Vec<RevisionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterator: Option<String>,
    pub done: bool,
}

// ---------------------------------------------------------------------------
// Members & invitations

#[derive(Debug, Serialize)]
pub struct MemberOut {
    pub username: String,
    #[serde(rename = "accessLevel")]
    pub access_level: AccessLevel,
}

#[derive(Debug, Serialize)]
pub struct MemberListOut {
    pub data: Vec<MemberOut>,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct MemberModifyIn {
    #[serde(rename = "accessLevel")]
    pub access_level: AccessLevel,
}

#[derive(Debug, Serialize)]
pub struct InvitationOut {
    pub uid: String,
    #[serde(rename = "fromUsername", skip_serializing_if = "Option::is_none")]
    pub from_username: Option<String>,
    #[serde(rename = "fromPubkey", with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    pub from_pubkey: Option<Vec<u8>>,
    #[serde(rename = "signedEncryptionKey", with = "serde_bytes")]
    pub signed_encryption_key: Vec<u8>,
    #[serde(rename = "accessLevel")]
    pub access_level: AccessLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvitationListOut {
    pub data: Vec<InvitationOut>,
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct InvitationCreateIn {
    pub uid: String,
    #[serde(default = "default_version")]
    pub version: i64,
    /// Invitee username.
    pub username: String,
    /// Target collection UID.
    pub collection: String,
    #[serde(rename = "accessLevel")]
    pub access_level: AccessLevel,
    #[serde(rename = "signedEncryptionKey", with = "serde_bytes")]
    pub signed_encryption_key: Vec<u8>,
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct InvitationAcceptIn {
    /// The invitee's re-encrypted collection key.
    #[serde(rename = "encryptionKey", with = "serde_bytes")]
    pub encryption_key: Vec<u8>,
    #[serde(rename = "collectionType", with = "serde_bytes", default)]
    pub collection_type: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
pub struct FetchUserProfileIn {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct UserProfileOut {
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Streaming tickets

#[derive(Debug, Serialize)]
pub struct TicketOut {
    pub ticket: String,
}

/// Change event published to `col.<collectionId>` after a committed write.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub stoken: String,
}
