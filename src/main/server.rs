use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use vellum_core::{Result, config::Config, runtime, version};
use vellum_service::Services;

/// Server runtime state; complete
pub struct Server {
	/// Server runtime state; public portion
	pub server: Arc<vellum_core::Server>,

	pub services: Mutex<Option<Arc<Services>>>,
}

impl Server {
	pub fn new(config: Config, runtime: Option<runtime::Handle>) -> Result<Arc<Self>> {
		crate::logging::init(&config)?;

		vellum_core::config::check(&config)?;

		info!(
			server_name = %config.server_name,
			database_path = ?config.database_path,
			log_levels = %config.log,
			max_upload_size = %bytesize::ByteSize::b(config.max_upload_size as u64),
			"{}",
			version(),
		);

		Ok(Arc::new(Self {
			server: Arc::new(vellum_core::Server::new(config, runtime)),
			services: None.into(),
		}))
	}
}
