//! src/services/post_service.rs
//!
//! PostService: create/read/update/delete of posts backed by SQLite, with
//! attached images held in a `BlobStore`. The caller's identity is always an
//! explicit argument; the only authorization rule is that the post's owner
//! is the one mutating it.
//!
//! Blob side effects are not transactional with the record writes. A crash
//! between storing a blob and writing the row, or between deleting a blob and
//! deleting the row, can leave an unreferenced blob behind.

use crate::{
    models::{
        post::{Post, PostView, PostWithAuthor},
        user::User,
    },
    services::{
        blob_store::{BlobError, BlobStore},
        humanize::diff_for_humans,
        validation::{FieldErrors, PostInput, ValidPost, validate_post},
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(FieldErrors),
    #[error("post `{0}` not found")]
    NotFound(Uuid),
    #[error("user `{caller}` does not own post `{post}`")]
    Forbidden { post: Uuid, caller: Uuid },
    #[error("blob storage unavailable: {0}")]
    Storage(#[from] BlobError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type PostResult<T> = Result<T, PostError>;

const POST_COLUMNS: &str = "id, owner_id, title, description, image_key, created_at";

#[derive(Clone)]
pub struct PostService {
    /// Shared SQLite connection pool holding users and posts.
    pub db: Arc<SqlitePool>,

    /// Where attached images live.
    pub blobs: BlobStore,
}

/// The single authorization rule: only the owner may mutate a post.
pub fn assert_owner(post: &Post, caller_id: Uuid) -> PostResult<()> {
    if post.owner_id == caller_id {
        Ok(())
    } else {
        Err(PostError::Forbidden {
            post: post.id,
            caller: caller_id,
        })
    }
}

impl PostService {
    pub fn new(db: Arc<SqlitePool>, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Every post from every author, newest first.
    pub async fn list_all(&self, caller_id: Uuid) -> PostResult<Vec<PostView>> {
        let rows = sqlx::query_as::<_, PostWithAuthor>(
            "SELECT p.id, p.owner_id, p.title, p.description, p.image_key, p.created_at,
                    u.name AS author_name
             FROM posts p JOIN users u ON u.id = p.owner_id
             ORDER BY p.created_at DESC, p.rowid DESC",
        )
        .fetch_all(&*self.db)
        .await?;

        Ok(self.project(rows, caller_id))
    }

    /// Posts owned by `caller_id`, newest first.
    pub async fn list_mine(&self, caller_id: Uuid) -> PostResult<Vec<PostView>> {
        let rows = sqlx::query_as::<_, PostWithAuthor>(
            "SELECT p.id, p.owner_id, p.title, p.description, p.image_key, p.created_at,
                    u.name AS author_name
             FROM posts p JOIN users u ON u.id = p.owner_id
             WHERE p.owner_id = ?
             ORDER BY p.created_at DESC, p.rowid DESC",
        )
        .bind(caller_id)
        .fetch_all(&*self.db)
        .await?;

        Ok(self.project(rows, caller_id))
    }

    fn project(&self, rows: Vec<PostWithAuthor>, caller_id: Uuid) -> Vec<PostView> {
        let now = Utc::now();
        rows.into_iter()
            .map(|row| PostView {
                id: row.post.id,
                image_url: row.post.image_key.as_deref().map(|k| self.blobs.resolve_url(k)),
                is_owner: row.post.owner_id == caller_id,
                created_at_humanized: diff_for_humans(row.post.created_at, now),
                title: row.post.title,
                description: row.post.description,
                author_display_name: row.author_name,
            })
            .collect()
    }

    /// Fetch a single post by id.
    pub async fn find_post(&self, post_id: Uuid) -> PostResult<Post> {
        sqlx::query_as::<_, Post>(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(post_id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => PostError::NotFound(post_id),
                other => PostError::Sqlx(other),
            })
    }

    /// Create a post owned by `caller_id`.
    ///
    /// Nothing is stored unless every field validates. The image, if any, is
    /// written to blob storage before the row.
    pub async fn create(&self, caller_id: Uuid, input: &PostInput) -> PostResult<Post> {
        if let Some(upload) = &input.image {
            debug!(file_name = ?upload.file_name, size = upload.bytes.len(), "received image upload");
        }
        let valid = validate_post(input).map_err(PostError::Validation)?;

        let image_key = match &valid.image {
            Some(image) => Some(self.blobs.put(&image.bytes, image.kind).await?),
            None => None,
        };

        let inserted = sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO posts ({cols}) VALUES (?, ?, ?, ?, ?, ?) RETURNING {cols}",
            cols = POST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(caller_id)
        .bind(&valid.title)
        .bind(&valid.description)
        .bind(image_key.as_deref())
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(post) => {
                info!(post_id = %post.id, caller_id = %caller_id, image_key = ?post.image_key, "post created");
                Ok(post)
            }
            Err(err) => {
                if let Some(key) = image_key {
                    self.discard_blob(&key).await;
                }
                Err(PostError::Sqlx(err))
            }
        }
    }

    /// Replace a post's title and description, and its image when a new one
    /// is supplied. Without a new image the existing one is kept.
    ///
    /// If removing the old image or writing the row fails, the freshly
    /// stored image is discarded before the error is returned.
    pub async fn update(
        &self,
        caller_id: Uuid,
        post_id: Uuid,
        input: &PostInput,
    ) -> PostResult<Post> {
        let post = self.find_post(post_id).await?;
        assert_owner(&post, caller_id)?;

        let valid = validate_post(input).map_err(PostError::Validation)?;

        let new_key = match &valid.image {
            Some(image) => Some(self.blobs.put(&image.bytes, image.kind).await?),
            None => None,
        };

        let updated = match self.apply_update(&post, &valid, new_key.as_deref()).await {
            Ok(updated) => updated,
            Err(err) => {
                if let Some(key) = new_key.as_deref() {
                    self.discard_blob(key).await;
                }
                return Err(err);
            }
        };

        info!(post_id = %post_id, caller_id = %caller_id, image_key = ?updated.image_key, "post updated");
        Ok(updated)
    }

    /// Swap out the old image when a new key is given, then write the row.
    async fn apply_update(
        &self,
        post: &Post,
        valid: &ValidPost,
        new_key: Option<&str>,
    ) -> PostResult<Post> {
        if let (Some(_), Some(old_key)) = (new_key, post.image_key.as_deref()) {
            self.blobs.delete(old_key).await?;
            debug!(post_id = %post.id, image_key = %old_key, "replaced image removed");
        }
        let image_key = new_key.or(post.image_key.as_deref());

        sqlx::query_as::<_, Post>(&format!(
            "UPDATE posts SET title = ?, description = ?, image_key = ?
             WHERE id = ? RETURNING {}",
            POST_COLUMNS
        ))
        .bind(&valid.title)
        .bind(&valid.description)
        .bind(image_key)
        .bind(post.id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(PostError::NotFound(post.id))
    }

    /// Permanently delete a post and its image.
    pub async fn delete(&self, caller_id: Uuid, post_id: Uuid) -> PostResult<()> {
        let post = self.find_post(post_id).await?;
        assert_owner(&post, caller_id)?;

        if let Some(key) = post.image_key.as_deref() {
            self.blobs.delete(key).await?;
        }

        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PostError::NotFound(post_id));
        }

        info!(post_id = %post_id, caller_id = %caller_id, "post deleted");
        Ok(())
    }

    /// Best-effort removal of a blob no row will reference.
    async fn discard_blob(&self, key: &str) {
        if let Err(err) = self.blobs.delete(key).await {
            warn!(image_key = %key, error = %err, "failed to remove unreferenced blob");
        }
    }

    /// Register a user. Stands in for the identity provider's sign-up flow.
    pub async fn create_user(&self, name: &str) -> PostResult<User> {
        let name = name.trim();
        if name.is_empty() {
            let mut errors = FieldErrors::default();
            errors.add("name", "The name field is required.");
            return Err(PostError::Validation(errors));
        }

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, created_at) VALUES (?, ?, ?)
             RETURNING id, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn find_user(&self, user_id: Uuid) -> PostResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }
}
