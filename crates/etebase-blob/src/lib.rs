//! Filesystem content store for encrypted chunk blobs.
//!
//! Chunk bytes are opaque ciphertext to the server. They are stored under a
//! stable path derived from the owning user, the collection UID, and the
//! chunk UID, so concurrent writers always target disjoint paths:
//!
//! `{base}/user_{ownerId}/{collectionUid}/{chunkUid[..2]}/{chunkUid[2..]}`
//!
//! A chunk is written exactly once; the existence of its file is
//! authoritative for "chunk present".

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A chunk with this UID already exists for the collection.
    #[error("chunk already exists")]
    Exists,

    /// Zero-length chunk bodies are rejected.
    #[error("chunk has no content")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Content store rooted at a base directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    base: PathBuf,
}

impl ChunkStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The path chunk bytes live at, relative joins included.
    ///
    /// UIDs shorter than two characters fall back to a flat layout; real
    /// chunk UIDs are far longer.
    pub fn chunk_path(&self, owner_id: i64, collection_uid: &str, chunk_uid: &str) -> PathBuf {
        let user_dir = self.base.join(format!("user_{owner_id}")).join(collection_uid);
        if chunk_uid.len() < 2 {
            user_dir.join(chunk_uid)
        } else {
            user_dir.join(&chunk_uid[..2]).join(&chunk_uid[2..])
        }
    }

    /// Store chunk bytes. Fails with [`StoreError::Exists`] when the path is
    /// already occupied and [`StoreError::Empty`] for zero-length bodies.
    pub async fn put(
        &self,
        owner_id: i64,
        collection_uid: &str,
        chunk_uid: &str,
        data: &[u8],
    ) -> Result<PathBuf> {
        if data.is_empty() {
            return Err(StoreError::Empty);
        }

        let path = self.chunk_path(owner_id, collection_uid, chunk_uid);
        if fs::try_exists(&path).await? {
            return Err(StoreError::Exists);
        }

        atomic_write(&path, data, &self.base.join("tmp")).await?;
        tracing::debug!(chunk = chunk_uid, bytes = data.len(), "stored chunk");
        Ok(path)
    }

    /// Read chunk bytes back, or `None` if the chunk was never stored.
    pub async fn get(
        &self,
        owner_id: i64,
        collection_uid: &str,
        chunk_uid: &str,
    ) -> Result<Option<Bytes>> {
        let path = self.chunk_path(owner_id, collection_uid, chunk_uid);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, owner_id: i64, collection_uid: &str, chunk_uid: &str) -> Result<bool> {
        Ok(fs::try_exists(self.chunk_path(owner_id, collection_uid, chunk_uid)).await?)
    }
}

/// Write `data` to `dest` via a uniquely-named temp file and a rename, so a
/// crashed writer never leaves a partial chunk at the final path.
async fn atomic_write(dest: &Path, data: &[u8], temp_folder: &Path) -> Result<()> {
    fs::create_dir_all(temp_folder).await?;
    let temp_path = temp_folder.join(format!("tmp_{}", uuid::Uuid::new_v4()));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(&temp_path, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.put(1, "colUID", "abcdef", b"hello").await.unwrap();
        let data = store.get(1, "colUID", "abcdef").await.unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected_and_keeps_first_body() {
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.put(1, "colUID", "dupuid", b"hello").await.unwrap();
        let err = store.put(1, "colUID", "dupuid", b"world").await.unwrap_err();
        assert!(matches!(err, StoreError::Exists));

        let data = store.get(1, "colUID", "dupuid").await.unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        let err = store.put(1, "colUID", "abcd", b"").await.unwrap_err();
        assert!(matches!(err, StoreError::Empty));
        assert!(!store.exists(1, "colUID", "abcd").await.unwrap());
    }

    #[tokio::test]
    async fn missing_chunk_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        assert!(store.get(7, "colUID", "nothere").await.unwrap().is_none());
    }

    #[test]
    fn path_layout_shards_by_uid_prefix() {
        let store = ChunkStore::new("/data/chunks");
        let path = store.chunk_path(42, "SOMECOLLECTION", "abXYZ");
        assert_eq!(
            path,
            PathBuf::from("/data/chunks/user_42/SOMECOLLECTION/ab/XYZ")
        );
    }

    #[tokio::test]
    async fn same_uid_in_different_collections_are_distinct() {
        let dir = tempdir().unwrap();
        let store = ChunkStore::new(dir.path());

        store.put(1, "colA", "shared", b"a-bytes").await.unwrap();
        store.put(1, "colB", "shared", b"b-bytes").await.unwrap();

        assert_eq!(&store.get(1, "colA", "shared").await.unwrap().unwrap()[..], b"a-bytes");
        assert_eq!(&store.get(1, "colB", "shared").await.unwrap().unwrap()[..], b"b-bytes");
    }
}
