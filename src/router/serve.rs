use std::{net::SocketAddr, sync::Arc};

use axum::Router;
use axum_server::{Handle as ServerHandle, bind};
use tracing::{debug, info};
use vellum_service::Services;
use vellum_core::Result;

pub(crate) async fn serve(
	services: &Arc<Services>,
	router: Router,
	handle: ServerHandle,
	addr: SocketAddr,
) -> Result {
	let service = router.into_make_service_with_connect_info::<SocketAddr>();

	info!("Listening on {addr}");
	bind(addr)
		.handle(handle)
		.serve(service)
		.await?;

	debug!(
		server = %services.server.name,
		"Stopped listening on {addr}"
	);

	Ok(())
}
