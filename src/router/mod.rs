mod layers;
mod request;
mod serve;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum_server::Handle as ServerHandle;
use tracing::debug;
use vellum_core::{Result, Server};
use vellum_database::Database;
use vellum_service::Services;

/// Open the database and assemble the services.
pub async fn start(server: &Arc<Server>) -> Result<Arc<Services>> {
	debug!("Starting...");

	let db = Database::open(server).await?;
	let services = Services::build(server.clone(), db)?;
	services.start().await?;

	debug!("Started");
	Ok(services)
}

/// Serve requests until shutdown is signalled.
pub async fn run(services: &Arc<Services>) -> Result {
	let server = &services.server;
	let app = layers::build(services)?;
	let handle = ServerHandle::new();
	let addr = SocketAddr::new(server.config.address, server.config.port);

	tokio::spawn(watch_shutdown(server.clone(), handle.clone()));

	serve::serve(services, app, handle, addr).await
}

/// Wind the services down.
pub async fn stop(services: Arc<Services>) -> Result {
	debug!("Shutting down...");

	services.stop().await;

	debug!("Shutdown complete");
	Ok(())
}

async fn watch_shutdown(server: Arc<Server>, handle: ServerHandle) {
	server.until_shutdown().await;

	let timeout = Duration::from_secs(server.config.client_shutdown_timeout);
	debug!(?timeout, "Shutdown signal received; draining connections");
	handle.graceful_shutdown(Some(timeout));
}
