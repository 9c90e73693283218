//! Defines routes for the blog post API.
//!
//! ## Structure
//! - **Listing** (authenticated)
//!   - `GET    /posts`      : every post, newest first
//!   - `GET    /posts/mine` : the caller's posts
//!
//! - **Management** (authenticated, owner-only for existing posts)
//!   - `POST   /posts`      : create from a multipart form
//!   - `PUT    /posts/{id}` : replace title/description, optionally the image
//!   - `DELETE /posts/{id}` : delete post and its image
//!
//! - **Media**
//!   - `GET    /media/{*key}`: stream a stored image
//!
//! The caller is identified by the `x-user-id` header.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        post_handlers::{
            create_post, delete_post, get_media, list_my_posts, list_posts, update_post,
        },
    },
    services::post_service::PostService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};

/// Build the router for all endpoints.
///
/// `max_body_bytes` caps request bodies; it must sit above the image limit
/// so that oversized uploads are reported as validation errors.
pub fn routes(max_body_bytes: usize) -> Router<PostService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/mine", get(list_my_posts))
        .route("/posts/{id}", put(update_post).delete(delete_post))
        .route("/media/{*key}", get(get_media))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
