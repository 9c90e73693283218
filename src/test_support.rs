//! Shared fixtures for unit and router tests.

use crate::{
    db,
    services::{
        blob_store::BlobStore,
        post_service::PostService,
        validation::{ImageUpload, PostInput},
    },
};
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use std::{path::Path, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

/// An isolated service over an in-memory database and a temp blob root.
pub struct TestEnv {
    pub service: PostService,
    dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        // One connection, so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path().join("blobs"), "/media");
        Self {
            service: PostService::new(Arc::new(pool), blobs),
            dir,
        }
    }

    pub async fn user(&self, name: &str) -> Uuid {
        self.service.create_user(name).await.unwrap().id
    }

    pub fn blob_root(&self) -> std::path::PathBuf {
        self.dir.path().join("blobs")
    }

    /// Replace a stored blob with a non-empty directory so that deleting
    /// it fails with an I/O error.
    pub fn block_blob_removal(&self, key: &str) {
        let path = self.service.blobs.blob_path(key);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir_all(path.join("pinned")).unwrap();
        std::fs::write(path.join("pinned").join("keep"), b"x").unwrap();
    }
}

pub fn form(title: &str, description: &str) -> PostInput {
    PostInput {
        title: title.into(),
        description: description.into(),
        image: None,
    }
}

pub fn png_upload() -> Option<ImageUpload> {
    Some(ImageUpload {
        file_name: Some("pixel.png".into()),
        bytes: Bytes::from_static(PNG),
    })
}

/// Count regular files beneath `root`, ignoring temp files.
pub fn count_blobs(root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_blobs(&path)
            } else if entry.file_name().to_string_lossy().starts_with(".tmp-") {
                0
            } else {
                1
            }
        })
        .sum()
}
