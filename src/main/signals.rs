use std::sync::Arc;

use tracing::warn;

use crate::Server;

#[cfg(unix)]
pub(crate) async fn enable(server: Arc<Server>) {
	use tokio::signal::unix::{SignalKind, signal};

	let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM handler installed");
	let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT handler installed");

	let sig = tokio::select! {
		_ = terminate.recv() => "SIGTERM",
		_ = interrupt.recv() => "SIGINT",
	};

	warn!("Received {sig}; shutting down...");
	server.server.shutdown().ok();
}

#[cfg(not(unix))]
pub(crate) async fn enable(server: Arc<Server>) {
	tokio::signal::ctrl_c()
		.await
		.expect("ctrl-c handler installed");

	warn!("Received interrupt; shutting down...");
	server.server.shutdown().ok();
}
