use axum::{
	Json,
	extract::{Path, Query, State},
};
use ruma::{OwnedServerName, OwnedUserId};
use serde::Deserialize;
use serde_json::{Value, json};
use vellum_core::{Mxc, Result, err};

use crate::auth::Admin;

#[derive(Deserialize)]
pub(crate) struct QuarantineBody {
	reason: Option<String>,
	actor: Option<String>,
}

/// # `POST /_admin/v1/quarantine/{serverName}/{mediaId}`
#[tracing::instrument(skip_all, name = "admin_quarantine")]
pub(crate) async fn quarantine_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Path((server_name, media_id)): Path<(OwnedServerName, String)>,
	Query(body): Query<QuarantineBody>,
) -> Result<Json<Value>> {
	let mxc = Mxc { server_name: &server_name, media_id: &media_id };

	services
		.media
		.quarantine(&mxc, body.reason, body.actor)
		.await?;

	Ok(Json(json!({ "quarantined": true })))
}

/// # `DELETE /_admin/v1/quarantine/{serverName}/{mediaId}`
#[tracing::instrument(skip_all, name = "admin_unquarantine")]
pub(crate) async fn unquarantine_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Path((server_name, media_id)): Path<(OwnedServerName, String)>,
) -> Result<Json<Value>> {
	let mxc = Mxc { server_name: &server_name, media_id: &media_id };
	services.media.unquarantine(&mxc).await?;

	Ok(Json(json!({ "quarantined": false })))
}

/// # `GET /_admin/v1/quarantine`
pub(crate) async fn list_quarantined_route(
	State(services): State<crate::State>,
	_admin: Admin,
) -> Result<Json<Value>> {
	let quarantined: Vec<Value> = services
		.media
		.list_quarantined()?
		.into_iter()
		.map(|(mxc, row)| {
			json!({
				"mxc": mxc,
				"reason": row.reason,
				"actor": row.actor,
				"at": row.at,
			})
		})
		.collect();

	Ok(Json(json!({ "quarantined": quarantined })))
}

/// # `DELETE /_admin/v1/media/{serverName}/{mediaId}`
///
/// Purge one media item; the blob goes once its last referent does.
#[tracing::instrument(skip_all, name = "admin_purge")]
pub(crate) async fn purge_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Path((server_name, media_id)): Path<(OwnedServerName, String)>,
) -> Result<Json<Value>> {
	let mxc = Mxc { server_name: &server_name, media_id: &media_id };
	services.media.purge(&mxc).await?;

	Ok(Json(json!({ "purged": 1 })))
}

/// # `DELETE /_admin/v1/media/hash/{sha256Hex}`
///
/// Purge every record sharing the content hash.
#[tracing::instrument(skip_all, name = "admin_purge_hash")]
pub(crate) async fn purge_by_hash_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Path(hash): Path<String>,
) -> Result<Json<Value>> {
	if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(err!(Request(InvalidParam("Not a sha256 hex digest"))));
	}

	let purged = services
		.media
		.purge_by_content_hash(&hash.to_ascii_lowercase())
		.await?;

	Ok(Json(json!({ "purged": purged })))
}

/// # `DELETE /_admin/v1/media/user/{userId}`
///
/// Purge every upload by a local user.
#[tracing::instrument(skip_all, name = "admin_purge_user")]
pub(crate) async fn purge_from_user_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Path(user_id): Path<OwnedUserId>,
) -> Result<Json<Value>> {
	let purged = services.media.purge_from_user(&user_id).await?;

	Ok(Json(json!({ "purged": purged })))
}

#[derive(Deserialize)]
pub(crate) struct RemotePurgeParams {
	before_ms: u64,
}

/// # `DELETE /_admin/v1/media/remote`
///
/// Purge remote-origin media cached before the cutoff.
#[tracing::instrument(skip_all, name = "admin_purge_remote")]
pub(crate) async fn purge_remote_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Query(params): Query<RemotePurgeParams>,
) -> Result<Json<Value>> {
	let purged = services
		.media
		.purge_remote_before(params.before_ms)
		.await?;

	Ok(Json(json!({ "purged": purged })))
}

#[derive(Deserialize)]
pub(crate) struct ListParams {
	origin: Option<OwnedServerName>,
	uploader: Option<OwnedUserId>,
	content_type: Option<String>,
	before: Option<u64>,
	after: Option<u64>,
}

/// # `GET /_admin/v1/media`
pub(crate) async fn list_media_route(
	State(services): State<crate::State>,
	_admin: Admin,
	Query(params): Query<ListParams>,
) -> Result<Json<Value>> {
	let media = services.media.list_media(
		params.origin.as_ref(),
		params.uploader.as_deref(),
		params.content_type.as_deref(),
		params.before,
		params.after,
	)?;

	Ok(Json(json!({ "media": media })))
}
