pub mod logging;
pub mod server;
pub mod signals;

use std::sync::Arc;

use tracing::error;
use vellum_core::{Result, debug_info, runtime};
use vellum_service::Services;

pub use self::server::Server;

pub fn exec(server: &Arc<Server>, runtime: runtime::Runtime) -> Result {
	runtime.spawn(signals::enable(server.clone()));
	runtime.block_on(async_exec(server))?;
	runtime::shutdown(runtime);

	debug_info!("Exit runtime");
	Ok(())
}

/// Start, run and stop the server within the asynchronous runtime.
#[tracing::instrument(name = "main", parent = None, skip_all)]
async fn async_exec(server: &Arc<Server>) -> Result {
	let services = async_start(server).await?;
	async_run(&services).await?;
	async_stop(server).await
}

#[tracing::instrument(name = "start", skip_all)]
async fn async_start(server: &Arc<Server>) -> Result<Arc<Services>> {
	match vellum_router::start(&server.server).await {
		| Ok(services) => Ok(server
			.services
			.lock()
			.await
			.insert(services)
			.clone()),

		| Err(error) => {
			error!("Critical error starting server: {error}");
			Err(error)
		},
	}
}

async fn async_run(services: &Arc<Services>) -> Result {
	if let Err(error) = vellum_router::run(services).await {
		error!("Critical error running server: {error}");
		return Err(error);
	}

	Ok(())
}

#[tracing::instrument(name = "stop", skip_all)]
async fn async_stop(server: &Arc<Server>) -> Result {
	let services = server
		.services
		.lock()
		.await
		.take()
		.expect("services initialized");

	if let Err(error) = vellum_router::stop(services).await {
		error!("Critical error stopping server: {error}");
		return Err(error);
	}

	Ok(())
}
