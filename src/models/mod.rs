//! Core data models for the blog post service.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod post;
pub mod user;
