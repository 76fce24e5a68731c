use std::sync::Arc;

use async_trait::async_trait;
use vellum_core::{Result, Server};
use vellum_database::Database;

use crate::services::OnceServices;

/// Handed to each service's constructor; carries the shared process state
/// and the late-bound handles to sibling services.
pub(crate) struct Args<'a> {
	pub(crate) server: &'a Arc<Server>,
	pub(crate) db: &'a Arc<Database>,
	pub(crate) services: &'a Arc<OnceServices>,
}

#[async_trait]
pub(crate) trait Service: Send + Sync {
	/// Implement the construction of the service instance. Services are
	/// built in dependency order; sibling handles resolve lazily through
	/// `OnceServices`.
	fn build(args: &Args<'_>) -> Result<Arc<Self>>
	where
		Self: Sized;

	/// Implement the service's worker loop or one-shot initialization.
	async fn worker(self: Arc<Self>) -> Result { Ok(()) }

	/// Return the name of the service.
	fn name(&self) -> &str;
}

/// Last path segment of a module path, used as the service name.
pub(crate) fn make_name(module_path: &'static str) -> &'static str {
	module_path
		.rsplit("::")
		.next()
		.unwrap_or(module_path)
}
