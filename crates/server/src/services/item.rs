//! Item listing, revision history, and the two bulk write paths.
//!
//! Batch and transaction share one writer: both apply every write inside a
//! single database transaction, so all revisions and their stokens become
//! visible together or not at all. Transaction mode additionally enforces
//! the caller's per-item etags and the optional collection-level
//! `deps.stoken` precondition before anything is written.

use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};

use crate::broker::{collection_channel, Broker};
use crate::codec;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{Collection, CollectionItem};
use crate::wire::{
    ChangeEvent, ChunkRef, ContentOut, Deps, FetchUpdatesIn, FetchUpdatesOut, ItemListOut,
    ItemOut, ItemWrite, RevisionListOut, RevisionOut,
};

#[derive(Clone)]
pub struct ItemService {
    pool: SqlitePool,
    broker: Arc<Broker>,
}

/// Response shape for an item: its current revision is both the etag and
/// the content.
pub(crate) async fn item_out(
    conn: &mut SqliteConnection,
    item: &CollectionItem,
) -> Result<ItemOut> {
    let revision = db::current_revision(conn, item.id)
        .await?
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("item {} has no current revision", item.uid)))?;
    let chunk_uids = db::revision_chunk_uids(conn, revision.id).await?;

    let chunks = if chunk_uids.is_empty() {
        None
    } else {
        Some(chunk_uids.into_iter().map(|uid| ChunkRef { uid }).collect())
    };

    Ok(ItemOut {
        uid: item.uid.clone(),
        version: item.version,
        etag: revision.uid.clone(),
        content: ContentOut {
            uid: revision.uid,
            meta: revision.meta,
            deleted: revision.deleted,
            chunks,
        },
    })
}

impl ItemService {
    pub fn new(pool: SqlitePool, broker: Arc<Broker>) -> Self {
        Self { pool, broker }
    }

    async fn collection_for_member(
        &self,
        conn: &mut SqliteConnection,
        collection_uid: &str,
        user_id: i64,
    ) -> Result<(Collection, crate::models::CollectionMember)> {
        let collection = db::collection_by_uid(conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        let member = db::require_member(conn, user_id, collection.id).await?;
        Ok((collection, member))
    }

    /// Items of a collection changed since the caller's stoken.
    pub async fn list(
        &self,
        collection_uid: &str,
        user_id: i64,
        since_uid: Option<&str>,
        limit: i64,
    ) -> Result<ItemListOut> {
        let mut conn = self.pool.acquire().await?;
        let (collection, _) = self
            .collection_for_member(&mut conn, collection_uid, user_id)
            .await?;
        let since = db::resolve_stoken_opt(&mut conn, since_uid).await?;

        // The current revision always carries an item's largest stoken:
        // every new revision allocates a fresh one and becomes current.
        let mut rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
            "SELECT i.id, i.uid, i.version, \
                    COALESCE((SELECT MAX(r.stoken_id) \
                              FROM django_collectionitemrevision r \
                              WHERE r.item_id = i.id), 0) AS max_stoken \
             FROM django_collectionitem i \
             WHERE i.collection_id = ?1 \
               AND (?2 IS NULL OR \
                    COALESCE((SELECT MAX(r.stoken_id) \
                              FROM django_collectionitemrevision r \
                              WHERE r.item_id = i.id), 0) > ?2) \
             ORDER BY i.id ASC LIMIT ?3",
        )
        .bind(collection.id)
        .bind(since)
        .bind(limit + 1)
        .fetch_all(&mut *conn)
        .await?;

        let done = rows.len() as i64 <= limit;
        rows.truncate(limit as usize);

        let page_max = rows.iter().map(|r| r.3).max().unwrap_or(0);

        let mut data = Vec::with_capacity(rows.len());
        for (id, uid, version, _) in rows {
            let item = CollectionItem {
                id,
                uid,
                collection_id: collection.id,
                version,
            };
            data.push(item_out(&mut conn, &item).await?);
        }

        let stoken = if page_max > 0 {
            Some(db::stoken_uid_for_id(&mut conn, page_max).await?)
        } else {
            since_uid.map(str::to_string)
        };

        Ok(ItemListOut { data, stoken, done })
    }

    pub async fn get(
        &self,
        collection_uid: &str,
        item_uid: &str,
        user_id: i64,
    ) -> Result<ItemOut> {
        let mut conn = self.pool.acquire().await?;
        let (collection, _) = self
            .collection_for_member(&mut conn, collection_uid, user_id)
            .await?;
        let item = db::item_by_uid(&mut conn, collection.id, item_uid)
            .await?
            .ok_or(Error::NotMember)?;
        item_out(&mut conn, &item).await
    }

    /// Revision history of an item, newest first, cursored by revision UID.
    pub async fn revisions(
        &self,
        collection_uid: &str,
        item_uid: &str,
        user_id: i64,
        iterator: Option<&str>,
        limit: i64,
    ) -> Result<RevisionListOut> {
        let mut conn = self.pool.acquire().await?;
        let (collection, _) = self
            .collection_for_member(&mut conn, collection_uid, user_id)
            .await?;
        let item = db::item_by_uid(&mut conn, collection.id, item_uid)
            .await?
            .ok_or(Error::NotMember)?;

        let before = match iterator {
            None | Some("") => None,
            Some(uid) => {
                let row: Option<(i64,)> = sqlx::query_as(
                    "SELECT id FROM django_collectionitemrevision WHERE item_id = ? AND uid = ?",
                )
                .bind(item.id)
                .bind(uid)
                .fetch_optional(&mut *conn)
                .await?;
                let (id,) =
                    row.ok_or_else(|| Error::InvalidRequest("Invalid iterator".into()))?;
                Some(id)
            }
        };

        let mut rows: Vec<(String, Vec<u8>, bool)> = sqlx::query_as(
            "SELECT uid, meta, deleted FROM django_collectionitemrevision \
             WHERE item_id = ?1 AND (?2 IS NULL OR id < ?2) \
             ORDER BY id DESC LIMIT ?3",
        )
        .bind(item.id)
        .bind(before)
        .bind(limit + 1)
        .fetch_all(&mut *conn)
        .await?;

        let done = rows.len() as i64 <= limit;
        rows.truncate(limit as usize);

        let iterator = if done {
            None
        } else {
            rows.last().map(|(uid, _, _)| uid.clone())
        };

        Ok(RevisionListOut {
            data: rows
                .into_iter()
                .map(|(uid, meta, deleted)| RevisionOut { uid, meta, deleted })
                .collect(),
            iterator,
            done,
        })
    }

    /// Which of the caller's `(uid, etag)` pairs are out of date. Items the
    /// caller lists but that don't exist are silently omitted.
    pub async fn fetch_updates(
        &self,
        collection_uid: &str,
        user_id: i64,
        req: &FetchUpdatesIn,
    ) -> Result<FetchUpdatesOut> {
        let mut conn = self.pool.acquire().await?;
        let (collection, _) = self
            .collection_for_member(&mut conn, collection_uid, user_id)
            .await?;

        let mut data = Vec::new();
        for wanted in &req.items {
            let Some(item) = db::item_by_uid(&mut conn, collection.id, &wanted.uid).await? else {
                continue;
            };
            let current = db::current_revision(&mut conn, item.id).await?;
            if current.map(|r| r.uid).as_deref() != Some(wanted.etag.as_str()) {
                data.push(item_out(&mut conn, &item).await?);
            }
        }
        Ok(FetchUpdatesOut { data })
    }

    /// Batch write: preconditions are ignored, the whole batch is one
    /// atomic unit.
    pub async fn batch(
        &self,
        collection_uid: &str,
        user_id: i64,
        items: &[ItemWrite],
    ) -> Result<()> {
        self.apply_writes(collection_uid, user_id, items, None, false)
            .await
    }

    /// Transactional write: per-item etags and the optional `deps.stoken`
    /// are enforced; on any conflict nothing is written.
    pub async fn transaction(
        &self,
        collection_uid: &str,
        user_id: i64,
        items: &[ItemWrite],
        deps: Option<&Deps>,
    ) -> Result<()> {
        self.apply_writes(collection_uid, user_id, items, deps, true)
            .await
    }

    async fn apply_writes(
        &self,
        collection_uid: &str,
        user_id: i64,
        items: &[ItemWrite],
        deps: Option<&Deps>,
        enforce_etags: bool,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let (collection, member) = self
            .collection_for_member(&mut conn, collection_uid, user_id)
            .await?;
        if !member.can_write() {
            return Err(Error::NoWriteAccess);
        }
        drop(conn);

        let mut tx = self.pool.begin().await?;

        if let Some(Deps {
            stoken: Some(deps_uid),
        }) = deps
        {
            let deps_id = db::resolve_stoken(&mut *tx, deps_uid).await?.id;
            let max = db::collection_max_stoken(&mut *tx, collection.id).await?;
            if max > deps_id {
                return Err(Error::StaleStoken);
            }
        }

        let mut last_stoken = None;
        for write in items {
            let existing = db::item_by_uid(&mut *tx, collection.id, &write.uid).await?;

            if enforce_etags {
                if let Some(expected) = &write.etag {
                    let got = match &existing {
                        Some(item) => db::current_revision(&mut *tx, item.id)
                            .await?
                            .map(|r| r.uid)
                            .unwrap_or_default(),
                        None => String::new(),
                    };
                    if &got != expected {
                        return Err(Error::WrongEtag {
                            expected: expected.clone(),
                            got,
                        });
                    }
                }
            }

            let item_id = match existing {
                Some(item) => {
                    sqlx::query("UPDATE django_collectionitem SET version = ? WHERE id = ?")
                        .bind(write.version)
                        .bind(item.id)
                        .execute(&mut *tx)
                        .await?;
                    item.id
                }
                None => {
                    let result = sqlx::query(
                        "INSERT INTO django_collectionitem (uid, collection_id, version) \
                         VALUES (?, ?, ?)",
                    )
                    .bind(&write.uid)
                    .bind(collection.id)
                    .bind(write.version)
                    .execute(&mut *tx)
                    .await?;
                    result.last_insert_rowid()
                }
            };

            let chunks = write.content.chunks.clone().unwrap_or_default();
            let stoken = db::append_revision(
                &mut *tx,
                collection.id,
                item_id,
                &write.content.uid,
                &write.content.meta,
                write.content.deleted,
                &chunks,
            )
            .await?;
            last_stoken = Some(stoken);
        }

        tx.commit().await?;

        if let Some(stoken) = last_stoken {
            tracing::debug!(
                collection = collection_uid,
                items = items.len(),
                "items written"
            );
            let broker = self.broker.clone();
            let event = ChangeEvent {
                collection: collection.uid.clone(),
                stoken: stoken.uid,
            };
            let channel = collection_channel(collection.id);
            tokio::spawn(async move {
                if let Ok(payload) = codec::to_vec(&event) {
                    broker.publish(&channel, payload).await;
                }
            });
        }
        Ok(())
    }
}
