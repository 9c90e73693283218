//! Represents a user-authored post and its display projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A post as stored in the `posts` table.
///
/// `owner_id` and `created_at` are fixed at creation; `image_key`, when set,
/// points at a blob held by the blob store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Post {
    /// Unique identifier assigned at creation.
    pub id: Uuid,

    /// User who created the post and the only one allowed to change it.
    pub owner_id: Uuid,

    /// Title, 1 to 255 characters.
    pub title: String,

    /// Body text, non-empty.
    pub description: String,

    /// Key of the attached image in blob storage, if any.
    pub image_key: Option<String>,

    /// When the post was created.
    pub created_at: DateTime<Utc>,
}

/// A post joined with its author's display name, as read for listings.
#[derive(Clone, FromRow, Debug)]
pub struct PostWithAuthor {
    #[sqlx(flatten)]
    pub post: Post,
    pub author_name: String,
}

/// Display-shaped projection of a post handed to the presentation layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PostView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub author_display_name: String,
    pub is_owner: bool,
    pub created_at_humanized: String,
}
