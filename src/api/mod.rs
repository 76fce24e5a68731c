pub mod admin;
mod auth;
pub mod client;
pub mod router;
pub mod server;
mod utils;

use std::sync::Arc;

use vellum_service::Services;

pub use self::router::build;

/// Shared handler state: the built service collection.
pub type State = Arc<Services>;
