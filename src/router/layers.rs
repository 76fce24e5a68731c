use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, middleware, response::IntoResponse};
use http::{HeaderValue, Method, header};
use tower_http::{
	catch_panic::CatchPanicLayer,
	cors::{self, CorsLayer},
	set_header::SetResponseHeaderLayer,
	trace::TraceLayer,
};
use vellum_core::{Result, Server, err, version};
use vellum_service::Services;

use crate::request;

/// Slack over the configured upload cap for request framing; the ingest
/// pipeline enforces the real byte limit.
const BODY_LIMIT_SLACK: usize = 16 * 1024;

pub(crate) fn build(services: &Arc<Services>) -> Result<Router<()>> {
	let server = &services.server;

	let router = vellum_api::build(Router::new())
		.fallback(fallback)
		.with_state(services.clone());

	Ok(router
		.layer(middleware::from_fn_with_state(services.clone(), request::handle))
		.layer(cors_layer(server))
		.layer(DefaultBodyLimit::max(
			server
				.config
				.max_upload_size
				.saturating_add(BODY_LIMIT_SLACK),
		))
		.layer(SetResponseHeaderLayer::overriding(
			header::SERVER,
			HeaderValue::from_str(&version())
				.map_err(|e| err!(Config("(version)", "Invalid server header: {e}")))?,
		))
		.layer(TraceLayer::new_for_http())
		.layer(CatchPanicLayer::new()))
}

fn cors_layer(_server: &Server) -> CorsLayer {
	CorsLayer::new()
		.allow_origin(cors::Any)
		.allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
		.allow_headers([
			header::AUTHORIZATION,
			header::CONTENT_TYPE,
			header::RANGE,
		])
		.max_age(std::time::Duration::from_secs(86400))
}

async fn fallback() -> axum::response::Response {
	err!(Request(NotFound("Unknown route"))).into_response()
}
