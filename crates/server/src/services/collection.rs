//! Collection listing, creation, and the stoken-anchored sync queries.
//!
//! A collection has "changed since s" when the largest stoken over its
//! item revisions and its memberships exceeds s. Listing merges two more
//! streams into the page: the caller's removed-membership tombstones, and
//! the page cursor itself, which is the largest stoken id actually
//! observed in the emitted rows - never a freshly minted one, so a cursor
//! always names a mutation that existed before the query ran.

use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};

use crate::broker::{collection_channel, Broker};
use crate::codec;
use crate::db;
use crate::error::{Error, Result};
use crate::models::AccessLevel;
use crate::services::item::item_out;
use crate::services::validate_uid;
use crate::wire::{
    ChangeEvent, CollectionCreateIn, CollectionListOut, CollectionOut, RemovedOut,
};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, sqlx::FromRow)]
struct CollectionRow {
    id: i64,
    uid: String,
    #[allow(dead_code)]
    owner_id: i64,
    main_item_id: Option<i64>,
    access_level: AccessLevel,
    max_stoken: i64,
}

#[derive(Clone)]
pub struct CollectionService {
    pool: SqlitePool,
    broker: Arc<Broker>,
}

impl CollectionService {
    pub fn new(pool: SqlitePool, broker: Arc<Broker>) -> Self {
        Self { pool, broker }
    }

    /// Collections of `user_id` changed since the caller's stoken, plus
    /// removed-membership tombstones, one page at a time.
    pub async fn list(
        &self,
        user_id: i64,
        since_uid: Option<&str>,
        limit: i64,
        type_filter: Option<&[Vec<u8>]>,
    ) -> Result<CollectionListOut> {
        let mut conn = self.pool.acquire().await?;
        let since = db::resolve_stoken_opt(&mut conn, since_uid).await?;

        // Opaque type-UID bytes resolve against the caller's own type rows.
        let type_ids = match type_filter {
            None => None,
            Some(uids) => {
                let mut ids = Vec::with_capacity(uids.len());
                for uid in uids {
                    let row: Option<(i64,)> = sqlx::query_as(
                        "SELECT id FROM django_collectiontype WHERE owner_id = ? AND uid = ?",
                    )
                    .bind(user_id)
                    .bind(uid.as_slice())
                    .fetch_optional(&mut *conn)
                    .await?;
                    if let Some((id,)) = row {
                        ids.push(id);
                    }
                }
                Some(ids)
            }
        };

        let mut rows = if let Some(ids) = &type_ids {
            if ids.is_empty() {
                Vec::new()
            } else {
                self.query_rows(&mut conn, user_id, since, limit, Some(ids)).await?
            }
        } else {
            self.query_rows(&mut conn, user_id, since, limit, None).await?
        };

        let done = rows.len() as i64 <= limit;
        rows.truncate(limit as usize);

        let mut page_max = rows.iter().map(|r| r.max_stoken).max().unwrap_or(0);

        let mut data = Vec::with_capacity(rows.len());
        for row in &rows {
            data.push(self.row_to_out(&mut conn, row).await?);
        }

        let removed: Vec<(String, i64)> = sqlx::query_as(
            "SELECT c.uid, mr.stoken_id FROM django_collectionmemberremoved mr \
             JOIN django_collection c ON c.id = mr.collection_id \
             WHERE mr.user_id = ?1 AND (?2 IS NULL OR mr.stoken_id > ?2) \
             ORDER BY mr.stoken_id ASC",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;

        for (_, stoken_id) in &removed {
            page_max = page_max.max(*stoken_id);
        }

        let stoken = if page_max > 0 {
            Some(db::stoken_uid_for_id(&mut conn, page_max).await?)
        } else {
            since_uid.map(str::to_string)
        };

        let removed_memberships = if removed.is_empty() {
            None
        } else {
            Some(
                removed
                    .into_iter()
                    .map(|(uid, _)| RemovedOut { uid })
                    .collect(),
            )
        };

        Ok(CollectionListOut {
            data,
            stoken,
            done,
            removed_memberships,
        })
    }

    async fn query_rows(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        since: Option<i64>,
        limit: i64,
        type_ids: Option<&Vec<i64>>,
    ) -> Result<Vec<CollectionRow>> {
        // Type ids come from our own lookup above; interpolating integers
        // keeps the filter a static query shape per request.
        let type_clause = match type_ids {
            Some(ids) => format!(
                " AND m.collection_type_id IN ({})",
                ids.iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            None => String::new(),
        };

        let sql = format!(
            "SELECT * FROM ( \
               SELECT c.id, c.uid, c.owner_id, c.main_item_id, \
                      m.accessLevel AS access_level, \
                      MAX( \
                        COALESCE((SELECT MAX(r.stoken_id) \
                                  FROM django_collectionitemrevision r \
                                  JOIN django_collectionitem i ON i.id = r.item_id \
                                  WHERE i.collection_id = c.id), 0), \
                        COALESCE((SELECT MAX(m2.stoken_id) \
                                  FROM django_collectionmember m2 \
                                  WHERE m2.collection_id = c.id), 0)) AS max_stoken \
               FROM django_collection c \
               JOIN django_collectionmember m \
                 ON m.collection_id = c.id AND m.user_id = ?1{type_clause} \
             ) WHERE (?2 IS NULL OR max_stoken > ?2) \
             ORDER BY id ASC LIMIT ?3",
        );

        Ok(sqlx::query_as::<_, CollectionRow>(&sql)
            .bind(user_id)
            .bind(since)
            .bind(limit + 1)
            .fetch_all(&mut *conn)
            .await?)
    }

    async fn row_to_out(
        &self,
        conn: &mut SqliteConnection,
        row: &CollectionRow,
    ) -> Result<CollectionOut> {
        let main_item_id = row
            .main_item_id
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("collection {} has no main item", row.uid)))?;
        let item = sqlx::query_as::<_, crate::models::CollectionItem>(
            "SELECT id, uid, collection_id, version FROM django_collectionitem WHERE id = ?",
        )
        .bind(main_item_id)
        .fetch_one(&mut *conn)
        .await?;

        let stoken = if row.max_stoken > 0 {
            db::stoken_uid_for_id(conn, row.max_stoken).await?
        } else {
            String::new()
        };

        Ok(CollectionOut {
            item: item_out(conn, &item).await?,
            access_level: row.access_level,
            stoken,
        })
    }

    /// A single collection, gated on membership.
    pub async fn get(&self, user_id: i64, collection_uid: &str) -> Result<CollectionOut> {
        let mut conn = self.pool.acquire().await?;
        let collection = db::collection_by_uid(&mut conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        let member = db::require_member(&mut conn, user_id, collection.id).await?;

        let max_stoken = db::collection_max_stoken(&mut conn, collection.id).await?;
        let row = CollectionRow {
            id: collection.id,
            uid: collection.uid,
            owner_id: collection.owner_id,
            main_item_id: collection.main_item_id,
            access_level: member.access_level,
            max_stoken,
        };
        self.row_to_out(&mut conn, &row).await
    }

    /// Create a collection: the main item plus its first revision, and an
    /// admin membership for the owner, all in one transaction. The
    /// collection is inserted before its main item and patched afterwards
    /// because the two rows reference each other.
    pub async fn create(&self, user_id: i64, req: &CollectionCreateIn) -> Result<CollectionOut> {
        validate_uid("item.uid", &req.item.uid)?;
        validate_uid("item.content.uid", &req.item.content.uid)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO django_collection (uid, owner_id, main_item_id) VALUES (?, ?, NULL)",
        )
        .bind(&req.item.uid)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                Error::UniqueUid
            } else {
                Error::Database(e)
            }
        })?;
        let collection_id = result.last_insert_rowid();

        let result = sqlx::query(
            "INSERT INTO django_collectionitem (uid, collection_id, version) VALUES (?, ?, ?)",
        )
        .bind(&req.item.uid)
        .bind(collection_id)
        .bind(req.item.version)
        .execute(&mut *tx)
        .await?;
        let item_id = result.last_insert_rowid();

        let chunks = req.item.content.chunks.clone().unwrap_or_default();
        db::append_revision(
            &mut *tx,
            collection_id,
            item_id,
            &req.item.content.uid,
            &req.item.content.meta,
            req.item.content.deleted,
            &chunks,
        )
        .await?;

        sqlx::query("UPDATE django_collection SET main_item_id = ? WHERE id = ?")
            .bind(item_id)
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;

        let collection_type_id = match &req.collection_type {
            Some(type_uid) => {
                Some(db::get_or_create_collection_type(&mut *tx, user_id, type_uid).await?)
            }
            None => None,
        };

        let member_stoken = db::allocate_stoken(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO django_collectionmember \
             (collection_id, user_id, stoken_id, encryptionKey, collection_type_id, accessLevel) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(collection_id)
        .bind(user_id)
        .bind(member_stoken.id)
        .bind(&req.collection_key)
        .bind(collection_type_id)
        .bind(AccessLevel::Admin)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(collection = %req.item.uid, owner = user_id, "collection created");

        self.notify(collection_id, &req.item.uid, &member_stoken.uid);
        self.get(user_id, &req.item.uid).await
    }

    fn notify(&self, collection_id: i64, collection_uid: &str, stoken_uid: &str) {
        let broker = self.broker.clone();
        let event = ChangeEvent {
            collection: collection_uid.to_string(),
            stoken: stoken_uid.to_string(),
        };
        tokio::spawn(async move {
            if let Ok(payload) = codec::to_vec(&event) {
                broker.publish(&collection_channel(collection_id), payload).await;
            }
        });
    }
}
