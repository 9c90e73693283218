pub mod blob_store;
pub mod humanize;
pub mod post_service;
pub mod validation;
