//! Database pool construction and the query helpers shared by the
//! services.
//!
//! All mutations that must be visible to the sync engine go through
//! [`allocate_stoken`] inside the same transaction that writes the
//! mutation, so a mutation and its position in the global order commit
//! together or not at all.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};

use crate::crypto;
use crate::error::{Error, Result};
use crate::models::{Collection, CollectionItem, CollectionItemRevision, CollectionMember, Stoken};

const SCHEMA: &str = include_str!("schema.sql");

/// Open the pool and bootstrap the schema.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    // create_if_missing covers the file but not its directory
    if let Some(rest) = database_url.strip_prefix("sqlite://") {
        let path = rest.split('?').next().unwrap_or(rest);
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .min_connections(2)
        .max_connections(10)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

/// True when the error is a relational uniqueness violation rather than an
/// infrastructure failure.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Insert a fresh stoken row and return it. The autoincrement id is the
/// mutation's position in the global order.
pub async fn allocate_stoken(conn: &mut SqliteConnection) -> Result<Stoken> {
    let uid = crypto::generate_stoken_uid();
    let result = sqlx::query("INSERT INTO django_stoken (uid) VALUES (?)")
        .bind(&uid)
        .execute(&mut *conn)
        .await?;
    Ok(Stoken {
        id: result.last_insert_rowid(),
        uid,
    })
}

/// Resolve a wire stoken UID to its row. An unknown non-empty UID is the
/// caller's error.
pub async fn resolve_stoken(conn: &mut SqliteConnection, uid: &str) -> Result<Stoken> {
    sqlx::query_as::<_, Stoken>("SELECT id, uid FROM django_stoken WHERE uid = ?")
        .bind(uid)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::BadStoken)
}

/// Resolve an optional wire stoken to its ordering id.
pub async fn resolve_stoken_opt(
    conn: &mut SqliteConnection,
    uid: Option<&str>,
) -> Result<Option<i64>> {
    match uid {
        None | Some("") => Ok(None),
        Some(uid) => Ok(Some(resolve_stoken(conn, uid).await?.id)),
    }
}

pub async fn stoken_uid_for_id(conn: &mut SqliteConnection, id: i64) -> Result<String> {
    let (uid,): (String,) = sqlx::query_as("SELECT uid FROM django_stoken WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(uid)
}

pub async fn collection_by_uid(
    conn: &mut SqliteConnection,
    uid: &str,
) -> Result<Option<Collection>> {
    Ok(sqlx::query_as::<_, Collection>(
        "SELECT id, uid, owner_id, main_item_id FROM django_collection WHERE uid = ?",
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?)
}

pub async fn member_for(
    conn: &mut SqliteConnection,
    user_id: i64,
    collection_id: i64,
) -> Result<Option<CollectionMember>> {
    Ok(sqlx::query_as::<_, CollectionMember>(
        "SELECT id, collection_id, user_id, stoken_id, encryptionKey, collection_type_id, \
         accessLevel FROM django_collectionmember WHERE user_id = ? AND collection_id = ?",
    )
    .bind(user_id)
    .bind(collection_id)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Membership gate used by every collection-scoped operation.
pub async fn require_member(
    conn: &mut SqliteConnection,
    user_id: i64,
    collection_id: i64,
) -> Result<CollectionMember> {
    member_for(conn, user_id, collection_id)
        .await?
        .ok_or(Error::NotMember)
}

pub async fn item_by_uid(
    conn: &mut SqliteConnection,
    collection_id: i64,
    uid: &str,
) -> Result<Option<CollectionItem>> {
    Ok(sqlx::query_as::<_, CollectionItem>(
        "SELECT id, uid, collection_id, version FROM django_collectionitem \
         WHERE collection_id = ? AND uid = ?",
    )
    .bind(collection_id)
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?)
}

pub async fn current_revision(
    conn: &mut SqliteConnection,
    item_id: i64,
) -> Result<Option<CollectionItemRevision>> {
    Ok(sqlx::query_as::<_, CollectionItemRevision>(
        "SELECT id, uid, item_id, stoken_id, meta, current, deleted \
         FROM django_collectionitemrevision WHERE item_id = ? AND current = 1",
    )
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?)
}

/// Ordered chunk UIDs of a revision, in the order the writer supplied them.
pub async fn revision_chunk_uids(
    conn: &mut SqliteConnection,
    revision_id: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT c.uid FROM django_revisionchunkrelation rel \
         JOIN django_collectionitemchunk c ON c.id = rel.chunk_id \
         WHERE rel.revision_id = ? ORDER BY rel.id ASC",
    )
    .bind(revision_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(uid,)| uid).collect())
}

/// The collection's position in the global order: the largest stoken over
/// its item revisions and its memberships, or 0 for a collection with no
/// sync-visible history.
pub async fn collection_max_stoken(
    conn: &mut SqliteConnection,
    collection_id: i64,
) -> Result<i64> {
    let (max,): (i64,) = sqlx::query_as(
        "SELECT MAX( \
           COALESCE((SELECT MAX(r.stoken_id) FROM django_collectionitemrevision r \
                     JOIN django_collectionitem i ON i.id = r.item_id \
                     WHERE i.collection_id = ?1), 0), \
           COALESCE((SELECT MAX(m.stoken_id) FROM django_collectionmember m \
                     WHERE m.collection_id = ?1), 0))",
    )
    .bind(collection_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(max)
}

/// Append a revision to an item: allocate a stoken, retire the previous
/// current revision, insert the new one as current, and record its chunk
/// relations in order. Must run inside the caller's transaction.
pub async fn append_revision(
    conn: &mut SqliteConnection,
    collection_id: i64,
    item_id: i64,
    revision_uid: &str,
    meta: &[u8],
    deleted: bool,
    chunk_uids: &[String],
) -> Result<Stoken> {
    let stoken = allocate_stoken(conn).await?;

    sqlx::query(
        "UPDATE django_collectionitemrevision SET current = NULL \
         WHERE item_id = ? AND current = 1",
    )
    .bind(item_id)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        "INSERT INTO django_collectionitemrevision \
         (uid, item_id, stoken_id, meta, current, deleted) VALUES (?, ?, ?, ?, 1, ?)",
    )
    .bind(revision_uid)
    .bind(item_id)
    .bind(stoken.id)
    .bind(meta)
    .bind(deleted)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::UniqueUid
        } else {
            Error::Database(e)
        }
    })?;
    let revision_id = result.last_insert_rowid();

    for chunk_uid in chunk_uids {
        let chunk: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM django_collectionitemchunk WHERE collection_id = ? AND uid = ?",
        )
        .bind(collection_id)
        .bind(chunk_uid)
        .fetch_optional(&mut *conn)
        .await?;
        let (chunk_id,) = chunk.ok_or(Error::Validation {
            field: "chunks",
            detail: format!("Referenced chunk \"{chunk_uid}\" does not exist"),
        })?;

        sqlx::query(
            "INSERT INTO django_revisionchunkrelation (chunk_id, revision_id) VALUES (?, ?)",
        )
        .bind(chunk_id)
        .bind(revision_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(stoken)
}

/// Remove a membership and leave a tombstone behind, both under a fresh
/// stoken, so the removed user's next sync reports the loss.
pub async fn revoke_member(conn: &mut SqliteConnection, member: &CollectionMember) -> Result<()> {
    sqlx::query("DELETE FROM django_collectionmember WHERE id = ?")
        .bind(member.id)
        .execute(&mut *conn)
        .await?;

    let stoken = allocate_stoken(conn).await?;
    sqlx::query(
        "INSERT INTO django_collectionmemberremoved (collection_id, user_id, stoken_id) \
         VALUES (?, ?, ?)",
    )
    .bind(member.collection_id)
    .bind(member.user_id)
    .bind(stoken.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Look up or create the caller's collection-type row for the opaque type
/// UID bytes.
pub async fn get_or_create_collection_type(
    conn: &mut SqliteConnection,
    owner_id: i64,
    type_uid: &[u8],
) -> Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM django_collectiontype WHERE owner_id = ? AND uid = ?",
    )
    .bind(owner_id)
    .bind(type_uid)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO django_collectiontype (owner_id, uid) VALUES (?, ?)")
        .bind(owner_id)
        .bind(type_uid)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}
