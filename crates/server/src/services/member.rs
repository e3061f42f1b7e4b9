//! Collection membership management.
//!
//! Any membership mutation rotates the member's stoken so the sync engine
//! picks the collection up on the next incremental fetch. Removing a
//! member swaps the row for a tombstone in the same transaction: for a
//! given `(user, collection)` there is never both a membership and a
//! tombstone at once.

use sqlx::{SqliteConnection, SqlitePool};

use crate::db;
use crate::error::{Error, Result};
use crate::models::{AccessLevel, Collection, CollectionMember};
use crate::wire::{MemberListOut, MemberOut};

#[derive(Clone)]
pub struct MemberService {
    pool: SqlitePool,
}

impl MemberService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn collection_for_admin(
        &self,
        conn: &mut SqliteConnection,
        collection_uid: &str,
        user_id: i64,
    ) -> Result<Collection> {
        let collection = db::collection_by_uid(conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        let member = db::require_member(conn, user_id, collection.id).await?;
        if !member.is_admin() {
            return Err(Error::admin_required());
        }
        Ok(collection)
    }

    async fn member_by_username(
        &self,
        conn: &mut SqliteConnection,
        collection_id: i64,
        username: &str,
    ) -> Result<Option<CollectionMember>> {
        Ok(sqlx::query_as::<_, CollectionMember>(
            "SELECT m.id, m.collection_id, m.user_id, m.stoken_id, m.encryptionKey, \
                    m.collection_type_id, m.accessLevel \
             FROM django_collectionmember m \
             JOIN myauth_user u ON u.id = m.user_id \
             WHERE m.collection_id = ? AND u.username = ?",
        )
        .bind(collection_id)
        .bind(username.to_lowercase())
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// All members of the collection; admin only.
    pub async fn list(&self, collection_uid: &str, user_id: i64) -> Result<MemberListOut> {
        let mut conn = self.pool.acquire().await?;
        let collection = self
            .collection_for_admin(&mut conn, collection_uid, user_id)
            .await?;

        let rows: Vec<(String, AccessLevel)> = sqlx::query_as(
            "SELECT u.username, m.accessLevel FROM django_collectionmember m \
             JOIN myauth_user u ON u.id = m.user_id \
             WHERE m.collection_id = ? ORDER BY m.id ASC",
        )
        .bind(collection.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(MemberListOut {
            data: rows
                .into_iter()
                .map(|(username, access_level)| MemberOut {
                    username,
                    access_level,
                })
                .collect(),
            done: true,
        })
    }

    /// Change a member's access level; admin only. Allocates a fresh
    /// stoken for the membership so the change is sync-visible.
    pub async fn update_access(
        &self,
        collection_uid: &str,
        username: &str,
        user_id: i64,
        access_level: AccessLevel,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let collection = self
            .collection_for_admin(&mut conn, collection_uid, user_id)
            .await?;
        let target = self
            .member_by_username(&mut conn, collection.id, username)
            .await?
            .ok_or(Error::NotMember)?;
        if target.user_id == collection.owner_id {
            return Err(Error::AdminRequired(
                "Cannot change the access level of the collection owner",
            ));
        }
        drop(conn);

        let mut tx = self.pool.begin().await?;
        let stoken = db::allocate_stoken(&mut *tx).await?;
        sqlx::query(
            "UPDATE django_collectionmember SET accessLevel = ?, stoken_id = ? WHERE id = ?",
        )
        .bind(access_level)
        .bind(stoken.id)
        .bind(target.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(collection = collection_uid, member = username, "access level updated");
        Ok(())
    }

    /// Remove a member; admin only. Leaves a tombstone for the removed
    /// user's next sync.
    pub async fn remove(
        &self,
        collection_uid: &str,
        username: &str,
        user_id: i64,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let collection = self
            .collection_for_admin(&mut conn, collection_uid, user_id)
            .await?;
        let target = self
            .member_by_username(&mut conn, collection.id, username)
            .await?
            .ok_or(Error::NotMember)?;
        if target.user_id == collection.owner_id {
            return Err(Error::AdminRequired("Cannot remove the collection owner"));
        }
        drop(conn);

        let mut tx = self.pool.begin().await?;
        db::revoke_member(&mut *tx, &target).await?;
        tx.commit().await?;

        tracing::info!(collection = collection_uid, member = username, "member removed");
        Ok(())
    }

    /// Leave a collection. The owner cannot leave; they must transfer or
    /// destroy the collection instead.
    pub async fn leave(&self, collection_uid: &str, user_id: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let collection = db::collection_by_uid(&mut conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        let member = db::require_member(&mut conn, user_id, collection.id).await?;
        if collection.owner_id == user_id {
            return Err(Error::AdminRequired("Owner cannot leave collection"));
        }
        drop(conn);

        let mut tx = self.pool.begin().await?;
        db::revoke_member(&mut *tx, &member).await?;
        tx.commit().await?;

        tracing::info!(collection = collection_uid, user = user_id, "member left");
        Ok(())
    }
}
