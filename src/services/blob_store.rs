//! src/services/blob_store.rs
//!
//! BlobStore: key-addressed storage for uploaded images on local disk.
//! Payloads live beneath `root/{shard}/{shard}/{key}`, where the two shard
//! levels come from MD5(key) so no single directory grows unbounded.

use crate::services::validation::ImageKind;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_BLOB_KEY_LEN: usize = 1024;
const KEY_PREFIX: &str = "posts";
const READY_MARKER: &[u8] = b"ready";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Local-disk blob storage.
///
/// `put` always writes under a fresh key; existing blobs are never
/// overwritten in place.
#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Base directory on disk where blobs are stored.
    pub root: PathBuf,

    /// URL prefix under which blobs are served, e.g. `/media`.
    pub url_prefix: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Rejects keys that could escape the root directory.
    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        if key.is_empty() || key.len() > MAX_BLOB_KEY_LEN {
            return Err(BlobError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobError::InvalidKey);
        }
        Ok(())
    }

    /// Two-level shard identifiers: first two bytes of MD5(key) as hex.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    pub(crate) fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Store `bytes` under a freshly generated key and return that key.
    ///
    /// Bytes go to a temp file first, are fsynced, then renamed into place,
    /// so a reader never observes a partial blob.
    pub async fn put(&self, bytes: &Bytes, kind: ImageKind) -> BlobResult<String> {
        let key = format!("{}/{}.{}", KEY_PREFIX, Uuid::new_v4(), kind.extension());
        let file_path = self.blob_path(&key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = write_synced(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        debug!(blob_key = %key, size = bytes.len(), "stored blob");
        Ok(key)
    }

    /// Remove a blob. Deleting a key that is not present is a no-op.
    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob file {} already missing", file_path.display());
            }
            Err(err) => return Err(BlobError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Public URL under which the blob is served.
    pub fn resolve_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    /// Open a blob for streaming out.
    pub async fn open(&self, key: &str) -> BlobResult<File> {
        Self::ensure_key_safe(key)?;
        File::open(self.blob_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Io(err)
            }
        })
    }

    /// Whether a blob with this key is currently stored.
    pub async fn exists(&self, key: &str) -> BlobResult<bool> {
        Self::ensure_key_safe(key)?;
        Ok(fs::try_exists(self.blob_path(key)).await?)
    }

    /// Round-trip a small file through the root. The root is not created
    /// here, so a missing root is reported as an error.
    pub async fn check_writable(&self) -> BlobResult<()> {
        let marker = self.root.join(format!(".ready-{}", Uuid::new_v4()));
        fs::write(&marker, READY_MARKER).await?;
        let read_back = fs::read(&marker).await;
        let removed = fs::remove_file(&marker).await;
        if read_back? != READY_MARKER {
            return Err(BlobError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "blob root returned different bytes",
            )));
        }
        Ok(removed?)
    }

    /// Remove empty directories between `start` and the store root.
    ///
    /// Stops at the first directory that is missing, non-empty, or fails to
    /// be removed for any other reason.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_synced(path: &Path, bytes: &Bytes) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Content type to serve a blob with, derived from its key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    ImageKind::from_extension(ext)
        .map(ImageKind::mime)
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn store() -> (TempDir, BlobStore) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path(), "/media/");
        (dir, store)
    }

    #[tokio::test]
    async fn put_generates_fresh_keys_and_stores_bytes() {
        let (_dir, store) = store();
        let bytes = Bytes::from_static(PNG);

        let first = store.put(&bytes, ImageKind::Png).await.unwrap();
        let second = store.put(&bytes, ImageKind::Png).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("posts/") && first.ends_with(".png"));
        assert!(store.exists(&first).await.unwrap());
        assert_eq!(fs::read(store.blob_path(&first)).await.unwrap(), PNG);
    }

    #[tokio::test]
    async fn delete_removes_blob_and_prunes_shards() {
        let (dir, store) = store();
        let key = store
            .put(&Bytes::from_static(PNG), ImageKind::Png)
            .await
            .unwrap();

        store.delete(&key).await.unwrap();

        assert!(!store.exists(&key).await.unwrap());
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_noop() {
        let (_dir, store) = store();
        store.delete("posts/never-stored.png").await.unwrap();
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.delete("../etc/passwd").await,
            Err(BlobError::InvalidKey)
        ));
        assert!(matches!(
            store.open("/abs/path").await,
            Err(BlobError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn open_missing_blob_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.open("posts/missing.png").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_writable_leaves_no_marker_behind() {
        let (dir, store) = store();
        store.check_writable().await.unwrap();
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn check_writable_fails_when_root_is_missing() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("absent"), "/media");
        assert!(matches!(store.check_writable().await, Err(BlobError::Io(_))));
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn resolve_url_joins_prefix_without_double_slash() {
        let (_dir, store) = store();
        assert_eq!(store.resolve_url("posts/a.png"), "/media/posts/a.png");
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for_key("posts/a.svg"), "image/svg+xml");
        assert_eq!(content_type_for_key("posts/a.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("posts/a"), "application/octet-stream");
    }
}
