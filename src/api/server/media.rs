use axum::{
	extract::{Path, Query, State},
	response::Response,
};
use axum_client_ip::InsecureClientIp;
use vellum_core::{Result, err};
use vellum_service::{
	limits::{Principal, RouteClass},
	media::Dim,
};

use crate::{
	auth::Peer,
	client::media::{ThumbnailParams, file_response},
	utils,
};

/// # `GET /_federation/v1/media/download/{mediaId}`
///
/// Serve local media to a peer server. Never recurses into federation.
#[tracing::instrument(
	name = "federation_media_get",
	level = "debug",
	skip_all,
	fields(%client)
)]
pub(crate) async fn download_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	_peer: Peer,
	Path(media_id): Path<String>,
) -> Result<Response> {
	services
		.limits
		.check(RouteClass::Download, Principal::Ip(client))?;

	let meta = utils::get_file(
		&services,
		services.globals.server_name(),
		&media_id,
		None,
		false,
	)
	.await?;

	file_response(meta)
}

/// # `GET /_federation/v1/media/thumbnail/{mediaId}`
///
/// Serve a local thumbnail to a peer server.
#[tracing::instrument(
	name = "federation_media_thumbnail_get",
	level = "debug",
	skip_all,
	fields(%client)
)]
pub(crate) async fn thumbnail_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	_peer: Peer,
	Path(media_id): Path<String>,
	Query(params): Query<ThumbnailParams>,
) -> Result<Response> {
	services
		.limits
		.check(RouteClass::Thumbnail, Principal::Ip(client))?;

	let (width, height) = params
		.dimensions()
		.ok_or_else(|| err!(Request(InvalidParam("width and height are required"))))?;

	let dim = Dim::new(
		width,
		height,
		params.method()?,
		params.animated(),
		&services.server.config.thumbnail_sizes,
	)?;

	let meta = utils::get_thumbnail(
		&services,
		services.globals.server_name(),
		&media_id,
		&dim,
		false,
	)
	.await?;

	file_response(meta)
}
