use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use tokio::task::JoinHandle;
use tracing::{debug, trace};
use vellum_core::{Result, Server, err};
use vellum_database::Database;

use crate::{
	Service,
	client, globals, limits, media, resolver,
	service::Args,
};

/// Late-bound service registry. Every service holds one of these; sibling
/// handles resolve through the accessors, which are valid once
/// `Services::build` returns.
pub struct OnceServices {
	pub server: Arc<Server>,
	pub db: Arc<Database>,
	globals: OnceLock<Arc<globals::Service>>,
	client: OnceLock<Arc<client::Service>>,
	resolver: OnceLock<Arc<resolver::Service>>,
	limits: OnceLock<Arc<limits::Service>>,
	media: OnceLock<Arc<media::Service>>,
}

impl OnceServices {
	fn new(server: Arc<Server>, db: Arc<Database>) -> Self {
		Self {
			server,
			db,
			globals: OnceLock::new(),
			client: OnceLock::new(),
			resolver: OnceLock::new(),
			limits: OnceLock::new(),
			media: OnceLock::new(),
		}
	}

	pub fn globals(&self) -> &Arc<globals::Service> {
		self.globals.get().expect("globals service initialized")
	}

	pub fn client(&self) -> &Arc<client::Service> {
		self.client.get().expect("client service initialized")
	}

	pub fn resolver(&self) -> &Arc<resolver::Service> {
		self.resolver.get().expect("resolver service initialized")
	}

	pub fn limits(&self) -> &Arc<limits::Service> {
		self.limits.get().expect("limits service initialized")
	}

	pub fn media(&self) -> &Arc<media::Service> {
		self.media.get().expect("media service initialized")
	}
}

/// The fully-built service collection threaded through every request.
pub struct Services {
	pub globals: Arc<globals::Service>,
	pub client: Arc<client::Service>,
	pub resolver: Arc<resolver::Service>,
	pub limits: Arc<limits::Service>,
	pub media: Arc<media::Service>,

	pub server: Arc<Server>,
	pub db: Arc<Database>,

	workers: StdMutex<Vec<JoinHandle<Result>>>,
}

impl Services {
	pub fn build(server: Arc<Server>, db: Arc<Database>) -> Result<Arc<Self>> {
		let once = Arc::new(OnceServices::new(server.clone(), db.clone()));
		let args = Args { server: &server, db: &db, services: &once };

		macro_rules! build {
			($mod:ident) => {{
				let service = $mod::Service::build(&args)?;
				once.$mod
					.set(service.clone())
					.map_err(|_| err!("service '{}' already built", stringify!($mod)))?;
				service
			}};
		}

		let globals = build!(globals);
		let client = build!(client);
		let resolver = build!(resolver);
		let limits = build!(limits);
		let media = build!(media);

		Ok(Arc::new(Self {
			globals,
			client,
			resolver,
			limits,
			media,
			server,
			db,
			workers: StdMutex::new(Vec::new()),
		}))
	}

	/// Initialize and start the services. One-shot initializers run to
	/// completion here; long-running workers are spawned onto the runtime.
	pub async fn start(self: &Arc<Self>) -> Result {
		debug!("Starting services...");

		self.media.clone().worker().await?;

		let limits = self.limits.clone();
		self.workers
			.lock()?
			.push(tokio::spawn(limits.worker()));

		debug!("Services startup complete.");
		Ok(())
	}

	/// Stop the services. The shutdown signal has already fired when this
	/// is called; workers observe it and wind down, then we reap them.
	pub async fn stop(&self) {
		debug!("Shutting down services...");

		let workers: Vec<_> = std::mem::take(&mut *self.workers.lock().expect("workers locked"));
		for worker in workers {
			trace!("Waiting for worker to finish...");
			worker.abort();
			worker.await.ok();
		}

		if let Err(e) = self.db.engine.flush() {
			tracing::error!("Database flush on shutdown failed: {e}");
		}

		debug!("Services shutdown complete.");
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use std::sync::{Arc, OnceLock};

	use vellum_core::{Server, config::Config};
	use vellum_database::Database;

	use super::Services;

	/// Shared service stack over a throwaway database for unit tests that
	/// need configured services but perform no I/O through them.
	pub(crate) fn services() -> Arc<Services> {
		static SERVICES: OnceLock<Arc<Services>> = OnceLock::new();

		SERVICES
			.get_or_init(|| {
				let path = std::env::temp_dir().join(format!(
					"vellum-service-tests-{}-{}",
					std::process::id(),
					vellum_core::utils::random_string(8),
				));

				let config: Config = figment::Figment::new()
					.merge(figment::providers::Serialized::defaults(
						serde_json::json!({
							"server_name": "test.local",
							"database_path": path,
						}),
					))
					.extract()
					.expect("test config");

				let server = Arc::new(Server::new(config, None));
				let db = futures::executor::block_on(Database::open(&server))
					.expect("test database opens");

				Services::build(server, db).expect("services build")
			})
			.clone()
	}
}
