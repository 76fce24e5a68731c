use axum::{
	Json,
	body::Body,
	extract::{Path, Query, State},
	response::Response,
};
use axum_client_ip::InsecureClientIp;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode, header};
use ruma::OwnedServerName;
use serde::Deserialize;
use serde_json::{Value, json};
use vellum_core::{Error, Mxc, Result, err};
use vellum_service::{
	limits::{Principal, RouteClass},
	media::{CACHE_CONTROL_IMMUTABLE, CORP_CROSS_ORIGIN, Dim, FileMeta, Method},
};

use crate::{auth, auth::AuthedUser, utils};

#[derive(Deserialize)]
pub(crate) struct UploadParams {
	filename: Option<String>,
}

/// # `POST /_media/v1/upload`
///
/// Permanently save media on this server, returning its identifier.
#[tracing::instrument(skip_all, fields(%client), name = "media_upload", level = "debug")]
pub(crate) async fn upload_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	AuthedUser(user): AuthedUser,
	Query(params): Query<UploadParams>,
	request: axum::extract::Request,
) -> Result<Json<Value>> {
	services
		.limits
		.check(RouteClass::Upload, Principal::User(user.clone()))?;

	let content_type = header_str(request.headers(), header::CONTENT_TYPE);
	let declared_len = header_str(request.headers(), header::CONTENT_LENGTH)
		.and_then(|len| len.parse::<u64>().ok());

	let stream = request
		.into_body()
		.into_data_stream()
		.map_err(|e| err!("Client stream failed: {e}"))
		.boxed();

	let record = services
		.media
		.upload(
			Some(&user),
			None,
			content_type.as_deref(),
			params.filename.as_deref(),
			declared_len,
			stream,
		)
		.await?;

	Ok(Json(json!({
		"content_uri": format!("mxc://{}/{}", record.origin, record.media_id),
	})))
}

/// # `PUT /_media/v1/upload/{mediaId}`
///
/// Importer path: store media under a caller-supplied identifier. The
/// media-id namespace is an operator concern, so this requires an admin
/// token alongside the uploading user.
#[tracing::instrument(skip_all, fields(%client), name = "media_import", level = "debug")]
pub(crate) async fn upload_with_id_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	_admin: auth::Admin,
	Path(media_id): Path<String>,
	Query(params): Query<UploadParams>,
	request: axum::extract::Request,
) -> Result<Json<Value>> {
	Mxc::validate_media_id(&media_id)?;

	let content_type = header_str(request.headers(), header::CONTENT_TYPE);
	let declared_len = header_str(request.headers(), header::CONTENT_LENGTH)
		.and_then(|len| len.parse::<u64>().ok());

	let stream = request
		.into_body()
		.into_data_stream()
		.map_err(|e| err!("Client stream failed: {e}"))
		.boxed();

	let record = services
		.media
		.upload(
			None,
			Some(media_id),
			content_type.as_deref(),
			params.filename.as_deref(),
			declared_len,
			stream,
		)
		.await
		.map_err(|e| match e {
			| Error::Conflict(message) =>
				err!(Request(InvalidParam("Media ID is taken: {message}"))),
			| other => other,
		})?;

	Ok(Json(json!({
		"content_uri": format!("mxc://{}/{}", record.origin, record.media_id),
	})))
}

#[derive(Deserialize)]
pub(crate) struct DownloadParams {
	allow_remote: Option<bool>,
}

/// # `GET /_media/v1/download/{serverName}/{mediaId}`
///
/// Load media from this server or over federation.
#[tracing::instrument(skip_all, fields(%client), name = "media_get", level = "debug")]
pub(crate) async fn download_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	headers: HeaderMap,
	Path((server_name, media_id)): Path<(OwnedServerName, String)>,
	Query(params): Query<DownloadParams>,
) -> Result<Response> {
	let principal = download_principal(&services, &headers, client)?;
	services.limits.check(RouteClass::Download, principal)?;

	let meta = utils::get_file(
		&services,
		&server_name,
		&media_id,
		None,
		params.allow_remote.unwrap_or(true),
	)
	.await?;

	file_response(meta)
}

/// # `GET /_media/v1/download/{serverName}/{mediaId}/{fileName}`
///
/// Load media, serving it under the requested filename.
#[tracing::instrument(skip_all, fields(%client), name = "media_get", level = "debug")]
pub(crate) async fn download_as_filename_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	headers: HeaderMap,
	Path((server_name, media_id, filename)): Path<(OwnedServerName, String, String)>,
	Query(params): Query<DownloadParams>,
) -> Result<Response> {
	let principal = download_principal(&services, &headers, client)?;
	services.limits.check(RouteClass::Download, principal)?;

	let meta = utils::get_file(
		&services,
		&server_name,
		&media_id,
		Some(&filename),
		params.allow_remote.unwrap_or(true),
	)
	.await?;

	file_response(meta)
}

#[derive(Deserialize)]
pub(crate) struct ThumbnailParams {
	width: Option<u32>,
	height: Option<u32>,
	method: Option<String>,
	animated: Option<bool>,
	allow_remote: Option<bool>,
}

impl ThumbnailParams {
	pub(crate) fn dimensions(&self) -> Option<(u32, u32)> {
		Some((self.width?, self.height?))
	}

	pub(crate) fn method(&self) -> Result<Option<Method>> {
		self.method
			.as_deref()
			.map(str::parse::<Method>)
			.transpose()
	}

	pub(crate) fn animated(&self) -> bool { self.animated.unwrap_or(false) }
}

/// # `GET /_media/v1/thumbnail/{serverName}/{mediaId}`
///
/// Load a derived thumbnail from this server or over federation.
/// Missing `method` defaults to `scale`; `animated` defaults to false.
#[tracing::instrument(skip_all, fields(%client), name = "media_thumbnail_get", level = "debug")]
pub(crate) async fn thumbnail_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	headers: HeaderMap,
	Path((server_name, media_id)): Path<(OwnedServerName, String)>,
	Query(params): Query<ThumbnailParams>,
) -> Result<Response> {
	let principal = download_principal(&services, &headers, client)?;
	services.limits.check(RouteClass::Thumbnail, principal)?;

	let width = params
		.width
		.ok_or_else(|| err!(Request(InvalidParam("width is required"))))?;
	let height = params
		.height
		.ok_or_else(|| err!(Request(InvalidParam("height is required"))))?;
	let method = params
		.method
		.as_deref()
		.map(str::parse::<Method>)
		.transpose()?;

	let dim = Dim::new(
		width,
		height,
		method,
		params.animated.unwrap_or(false),
		&services.server.config.thumbnail_sizes,
	)?;

	let meta = utils::get_thumbnail(
		&services,
		&server_name,
		&media_id,
		&dim,
		params.allow_remote.unwrap_or(true),
	)
	.await?;

	file_response(meta)
}

/// # `GET /_media/v1/config`
///
/// Returns the configured limits clients should respect.
pub(crate) async fn config_route(
	State(services): State<crate::State>,
	_user: AuthedUser,
) -> Result<Json<Value>> {
	let config = &services.server.config;

	Ok(Json(json!({
		"max_upload_size": config.max_upload_size,
		"thumbnail_sizes": config.thumbnail_sizes,
	})))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(ToOwned::to_owned)
}

/// Downloads may be anonymous when configured; the rate principal is the
/// identified user when one authenticated, the client address otherwise.
fn download_principal(
	services: &crate::State,
	headers: &HeaderMap,
	client: std::net::IpAddr,
) -> Result<Principal> {
	match auth::identify(services, headers)? {
		| Some(user) => Ok(Principal::User(user)),
		| None => Ok(Principal::Ip(client)),
	}
}

pub(crate) fn file_response(meta: FileMeta) -> Result<Response> {
	let content = meta.content.unwrap_or_default();

	let mut builder = Response::builder()
		.status(StatusCode::OK)
		.header(header::CACHE_CONTROL, CACHE_CONTROL_IMMUTABLE)
		.header("cross-origin-resource-policy", CORP_CROSS_ORIGIN)
		.header(header::CONTENT_LENGTH, content.len());

	if let Some(content_type) = &meta.content_type {
		builder = builder.header(header::CONTENT_TYPE, content_type);
	}

	if let Some(content_disposition) = &meta.content_disposition {
		builder = builder.header(
			header::CONTENT_DISPOSITION,
			content_disposition.to_string(),
		);
	}

	Ok(builder.body(Body::from(content))?)
}
