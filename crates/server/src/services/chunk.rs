//! Chunk upload and download.
//!
//! Chunk bytes never touch the database; the row only records the content
//! store path. Upload is write-once per `(collection, uid)` - the second
//! upload with the same UID is rejected no matter what it carries.

use bytes::Bytes;
use etebase_blob::ChunkStore;
use sqlx::SqlitePool;

use crate::db;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct ChunkService {
    pool: SqlitePool,
    store: ChunkStore,
}

impl ChunkService {
    pub fn new(pool: SqlitePool, store: ChunkStore) -> Self {
        Self { pool, store }
    }

    pub async fn upload(
        &self,
        collection_uid: &str,
        chunk_uid: &str,
        user_id: i64,
        data: &[u8],
    ) -> Result<()> {
        super::validate_uid("chunk", chunk_uid)?;
        if data.is_empty() {
            return Err(Error::ChunkNoContent);
        }

        let mut conn = self.pool.acquire().await?;
        let collection = db::collection_by_uid(&mut conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        let member = db::require_member(&mut conn, user_id, collection.id).await?;
        if !member.can_write() {
            return Err(Error::NoWriteAccess);
        }

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM django_collectionitemchunk WHERE collection_id = ? AND uid = ?",
        )
        .bind(collection.id)
        .bind(chunk_uid)
        .fetch_optional(&mut *conn)
        .await?;
        if existing.is_some() {
            return Err(Error::ChunkExists);
        }

        let path = self
            .store
            .put(collection.owner_id, collection_uid, chunk_uid, data)
            .await?;

        sqlx::query(
            "INSERT INTO django_collectionitemchunk (uid, collection_id, chunkFile) \
             VALUES (?, ?, ?)",
        )
        .bind(chunk_uid)
        .bind(collection.id)
        .bind(path.to_string_lossy().as_ref())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                Error::ChunkExists
            } else {
                Error::Database(e)
            }
        })?;
        Ok(())
    }

    pub async fn download(
        &self,
        collection_uid: &str,
        chunk_uid: &str,
        user_id: i64,
    ) -> Result<Bytes> {
        let mut conn = self.pool.acquire().await?;
        let collection = db::collection_by_uid(&mut conn, collection_uid)
            .await?
            .ok_or(Error::NotMember)?;
        db::require_member(&mut conn, user_id, collection.id).await?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM django_collectionitemchunk WHERE collection_id = ? AND uid = ?",
        )
        .bind(collection.id)
        .bind(chunk_uid)
        .fetch_optional(&mut *conn)
        .await?;
        if existing.is_none() {
            return Err(Error::ChunkNoContent);
        }

        self.store
            .get(collection.owner_id, collection_uid, chunk_uid)
            .await?
            .ok_or(Error::ChunkNoContent)
    }
}
