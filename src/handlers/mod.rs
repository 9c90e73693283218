pub mod health_handlers;
pub mod identity;
pub mod post_handlers;
