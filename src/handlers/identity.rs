//! Resolves the caller from the request.
//!
//! Authentication happens upstream; by the time a request reaches this
//! service the identity provider has put the caller's user id in the
//! `x-user-id` header. The extractor only checks that the id names a known
//! user.

use crate::{errors::AppError, models::user::User, services::post_service::PostService};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller of the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }
}

impl FromRequestParts<PostService> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &PostService,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::unauthorized("Unauthenticated."))?;

        match service.find_user(user_id).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => {
                tracing::debug!(user_id = %user_id, "unknown user id presented");
                Err(AppError::unauthorized("Unauthenticated."))
            }
        }
    }
}
