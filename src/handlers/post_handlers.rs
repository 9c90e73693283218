//! HTTP handlers for post listing and management.
//! Forms arrive as multipart bodies; storage and authorization are
//! delegated to `PostService`.

use crate::{
    errors::AppError,
    handlers::identity::CurrentUser,
    models::post::{Post, PostView},
    services::{
        blob_store::content_type_for_key,
        post_service::PostService,
        validation::{ImageUpload, PostInput},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Which listing produced a response.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListView {
    All,
    Mine,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub view: ListView,
    pub posts: Vec<PostView>,
}

/// A post as returned from mutations, with its image URL resolved.
#[derive(Debug, Serialize)]
pub struct PostBody {
    #[serde(flatten)]
    pub post: Post,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<PostBody>,
}

/// `GET /posts`: every post, newest first.
pub async fn list_posts(
    State(service): State<PostService>,
    user: CurrentUser,
) -> Result<Json<ListResponse>, AppError> {
    let posts = service.list_all(user.id()).await?;
    Ok(Json(ListResponse {
        view: ListView::All,
        posts,
    }))
}

/// `GET /posts/mine`: the caller's own posts.
pub async fn list_my_posts(
    State(service): State<PostService>,
    user: CurrentUser,
) -> Result<Json<ListResponse>, AppError> {
    let posts = service.list_mine(user.id()).await?;
    Ok(Json(ListResponse {
        view: ListView::Mine,
        posts,
    }))
}

/// `POST /posts`: multipart `title`, `description`, optional `image`.
pub async fn create_post(
    State(service): State<PostService>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<MutationResponse>, AppError> {
    let input = read_post_form(multipart).await?;
    let post = service.create(user.id(), &input).await?;
    Ok(Json(MutationResponse {
        message: "Post created successfully!",
        post: Some(with_url(&service, post)),
    }))
}

/// `PUT /posts/{id}`: full replace of title and description; the image is
/// only replaced when a new one is uploaded.
pub async fn update_post(
    State(service): State<PostService>,
    user: CurrentUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<MutationResponse>, AppError> {
    let post_id = parse_post_id(&id)?;
    let input = read_post_form(multipart).await?;
    let post = service.update(user.id(), post_id, &input).await?;
    Ok(Json(MutationResponse {
        message: "Post updated successfully!",
        post: Some(with_url(&service, post)),
    }))
}

/// `DELETE /posts/{id}`
pub async fn delete_post(
    State(service): State<PostService>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MutationResponse>, AppError> {
    let post_id = parse_post_id(&id)?;
    service.delete(user.id(), post_id).await?;
    Ok(Json(MutationResponse {
        message: "Post deleted successfully!",
        post: None,
    }))
}

/// `GET /media/{*key}`: stream a stored image.
pub async fn get_media(
    State(service): State<PostService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let file = service.blobs.open(&key).await?;
    let len = file.metadata().await.ok().map(|m| m.len());

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_key(&key)),
    );
    if let Some(len) = len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    // SVG uploads may carry script.
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; style-src 'unsafe-inline'"),
    );
    Ok(response)
}

fn with_url(service: &PostService, post: Post) -> PostBody {
    let image_url = post
        .image_key
        .as_deref()
        .map(|key| service.blobs.resolve_url(key));
    PostBody { post, image_url }
}

/// A malformed id cannot name an existing post.
fn parse_post_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::not_found(format!("post `{}` not found", raw)))
}

/// Collect the post form fields. Unknown fields are ignored and an empty
/// file part counts as no image.
async fn read_post_form(mut multipart: Multipart) -> Result<PostInput, AppError> {
    let mut input = PostInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" | "description" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                if name == "title" {
                    input.title = text;
                } else {
                    input.description = text;
                }
            }
            "image" => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .map(str::to_owned);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::new(err.status(), err.body_text()))?;
                input.image = if bytes.is_empty() && file_name.is_none() {
                    None
                } else {
                    Some(ImageUpload { file_name, bytes })
                };
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    Ok(input)
}
