//! Invitation lifecycle: create, list, accept, reject, cancel.
//!
//! An invitation carries the collection key wrapped for the invitee and
//! signed by the inviter. Accepting turns it into a membership and deletes
//! the invitation in one transaction; any stale tombstone for the pair is
//! cleared at the same time so a re-invited user is a member again, not
//! both.

use sqlx::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{Error, Result};
use crate::models::CollectionInvitation;
use crate::wire::{
    InvitationAcceptIn, InvitationCreateIn, InvitationListOut, InvitationOut, UserProfileOut,
};

#[derive(Clone)]
pub struct InvitationService {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct IncomingRow {
    uid: String,
    from_username: String,
    from_pubkey: Option<Vec<u8>>,
    signed_encryption_key: Vec<u8>,
    access_level: crate::models::AccessLevel,
}

#[derive(Debug, sqlx::FromRow)]
struct OutgoingRow {
    uid: String,
    username: String,
    collection: String,
    signed_encryption_key: Vec<u8>,
    access_level: crate::models::AccessLevel,
}

impl InvitationService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn invitation_by_uid(
        &self,
        conn: &mut SqliteConnection,
        uid: &str,
    ) -> Result<Option<CollectionInvitation>> {
        Ok(sqlx::query_as::<_, CollectionInvitation>(
            "SELECT id, uid, version, fromMember_id, user_id, signedEncryptionKey, accessLevel \
             FROM django_collectioninvitation WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Create an invitation; inviter must be an admin of the collection.
    pub async fn create(&self, user_id: i64, req: &InvitationCreateIn) -> Result<()> {
        super::validate_uid("uid", &req.uid)?;

        let mut conn = self.pool.acquire().await?;
        let collection = db::collection_by_uid(&mut conn, &req.collection)
            .await?
            .ok_or(Error::NotMember)?;
        let from_member = db::require_member(&mut conn, user_id, collection.id).await?;
        if !from_member.is_admin() {
            return Err(Error::admin_required());
        }

        let invitee: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM myauth_user WHERE username = ? AND is_active = 1")
                .bind(req.username.to_lowercase())
                .fetch_optional(&mut *conn)
                .await?;
        let (invitee_id,) = invitee.ok_or(Error::UserNotFound)?;

        if invitee_id == user_id {
            return Err(Error::NoSelfInvite);
        }
        if db::member_for(&mut conn, invitee_id, collection.id).await?.is_some() {
            return Err(Error::AlreadyMember);
        }

        sqlx::query(
            "INSERT INTO django_collectioninvitation \
             (uid, version, fromMember_id, user_id, signedEncryptionKey, accessLevel) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&req.uid)
        .bind(req.version)
        .bind(from_member.id)
        .bind(invitee_id)
        .bind(&req.signed_encryption_key)
        .bind(req.access_level)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                Error::InvitationExists
            } else {
                Error::Database(e)
            }
        })?;

        tracing::info!(collection = %req.collection, invitee = %req.username, "invitation created");
        Ok(())
    }

    /// Invitations waiting for the user, with the inviter's identity so
    /// the client can verify the signed key.
    pub async fn list_incoming(&self, user_id: i64) -> Result<InvitationListOut> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<IncomingRow> = sqlx::query_as(
            "SELECT inv.uid, u.username AS from_username, ui.pubkey AS from_pubkey, \
                    inv.signedEncryptionKey AS signed_encryption_key, \
                    inv.accessLevel AS access_level \
             FROM django_collectioninvitation inv \
             JOIN django_collectionmember fm ON fm.id = inv.fromMember_id \
             JOIN myauth_user u ON u.id = fm.user_id \
             LEFT JOIN django_userinfo ui ON ui.owner_id = fm.user_id \
             WHERE inv.user_id = ? ORDER BY inv.id ASC",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(InvitationListOut {
            data: rows
                .into_iter()
                .map(|row| InvitationOut {
                    uid: row.uid,
                    from_username: Some(row.from_username),
                    from_pubkey: row.from_pubkey,
                    signed_encryption_key: row.signed_encryption_key,
                    access_level: row.access_level,
                    username: None,
                    collection: None,
                })
                .collect(),
            done: true,
        })
    }

    /// Invitations the user has sent, across all collections they admin.
    pub async fn list_outgoing(&self, user_id: i64) -> Result<InvitationListOut> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<OutgoingRow> = sqlx::query_as(
            "SELECT inv.uid, u.username, c.uid AS collection, \
                    inv.signedEncryptionKey AS signed_encryption_key, \
                    inv.accessLevel AS access_level \
             FROM django_collectioninvitation inv \
             JOIN django_collectionmember fm ON fm.id = inv.fromMember_id \
             JOIN django_collection c ON c.id = fm.collection_id \
             JOIN myauth_user u ON u.id = inv.user_id \
             WHERE fm.user_id = ? ORDER BY inv.id ASC",
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(InvitationListOut {
            data: rows
                .into_iter()
                .map(|row| InvitationOut {
                    uid: row.uid,
                    from_username: None,
                    from_pubkey: None,
                    signed_encryption_key: row.signed_encryption_key,
                    access_level: row.access_level,
                    username: Some(row.username),
                    collection: Some(row.collection),
                })
                .collect(),
            done: true,
        })
    }

    pub async fn get_incoming(&self, uid: &str, user_id: i64) -> Result<InvitationOut> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<IncomingRow> = sqlx::query_as(
            "SELECT inv.uid, u.username AS from_username, ui.pubkey AS from_pubkey, \
                    inv.signedEncryptionKey AS signed_encryption_key, \
                    inv.accessLevel AS access_level \
             FROM django_collectioninvitation inv \
             JOIN django_collectionmember fm ON fm.id = inv.fromMember_id \
             JOIN myauth_user u ON u.id = fm.user_id \
             LEFT JOIN django_userinfo ui ON ui.owner_id = fm.user_id \
             WHERE inv.uid = ? AND inv.user_id = ?",
        )
        .bind(uid)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        let row = row.ok_or(Error::NotMember)?;

        Ok(InvitationOut {
            uid: row.uid,
            from_username: Some(row.from_username),
            from_pubkey: row.from_pubkey,
            signed_encryption_key: row.signed_encryption_key,
            access_level: row.access_level,
            username: None,
            collection: None,
        })
    }

    /// Accept: create the membership (with a fresh stoken), drop any stale
    /// tombstone for the pair, delete the invitation - one transaction.
    pub async fn accept(
        &self,
        uid: &str,
        user_id: i64,
        req: &InvitationAcceptIn,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let invitation = self
            .invitation_by_uid(&mut tx, uid)
            .await?
            .filter(|inv| inv.user_id == user_id)
            .ok_or(Error::NotMember)?;

        let from_member: Option<(i64,)> =
            sqlx::query_as("SELECT collection_id FROM django_collectionmember WHERE id = ?")
                .bind(invitation.from_member_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (collection_id,) = from_member.ok_or(Error::NotMember)?;

        sqlx::query(
            "DELETE FROM django_collectionmemberremoved WHERE user_id = ? AND collection_id = ?",
        )
        .bind(user_id)
        .bind(collection_id)
        .execute(&mut *tx)
        .await?;

        let collection_type_id = match &req.collection_type {
            Some(type_uid) => {
                Some(db::get_or_create_collection_type(&mut *tx, user_id, type_uid).await?)
            }
            None => None,
        };

        let stoken = db::allocate_stoken(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO django_collectionmember \
             (collection_id, user_id, stoken_id, encryptionKey, collection_type_id, accessLevel) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(collection_id)
        .bind(user_id)
        .bind(stoken.id)
        .bind(&req.encryption_key)
        .bind(collection_type_id)
        .bind(invitation.access_level)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                Error::AlreadyMember
            } else {
                Error::Database(e)
            }
        })?;

        sqlx::query("DELETE FROM django_collectioninvitation WHERE id = ?")
            .bind(invitation.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(invitation = uid, user = user_id, "invitation accepted");
        Ok(())
    }

    /// Reject (invitee deletes the incoming invitation).
    pub async fn reject(&self, uid: &str, user_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let invitation = self
            .invitation_by_uid(&mut conn, uid)
            .await?
            .filter(|inv| inv.user_id == user_id)
            .ok_or(Error::NotMember)?;

        sqlx::query("DELETE FROM django_collectioninvitation WHERE id = ?")
            .bind(invitation.id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Cancel (sender deletes the outgoing invitation).
    pub async fn delete_outgoing(&self, uid: &str, user_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let invitation = self
            .invitation_by_uid(&mut conn, uid)
            .await?
            .ok_or(Error::NotMember)?;

        let sender: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM django_collectionmember WHERE id = ?")
                .bind(invitation.from_member_id)
                .fetch_optional(&mut *conn)
                .await?;
        if sender.map(|(id,)| id) != Some(user_id) {
            return Err(Error::NotMember);
        }

        sqlx::query("DELETE FROM django_collectioninvitation WHERE id = ?")
            .bind(invitation.id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// The invitee's public key, so the inviter can wrap the collection
    /// key for them.
    pub async fn fetch_user_profile(&self, username: &str) -> Result<UserProfileOut> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT ui.pubkey FROM django_userinfo ui \
             JOIN myauth_user u ON u.id = ui.owner_id \
             WHERE u.username = ? AND u.is_active = 1",
        )
        .bind(username.to_lowercase())
        .fetch_optional(&mut *conn)
        .await?;
        let (pubkey,) = row.ok_or(Error::UserNotFound)?;
        Ok(UserProfileOut { pubkey })
    }
}
