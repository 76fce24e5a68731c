use axum::{
	Router,
	routing::{delete, get, post, put},
};

use crate::{admin, client, server};

/// Mounts every route class onto the router. The HTTP layout is an
/// adapter over the service layer; nothing here holds logic beyond
/// composition.
pub fn build(router: Router<crate::State>) -> Router<crate::State> {
	router
		// client
		.route("/healthz", get(client::health::healthz_route))
		.route("/_media/v1/upload", post(client::media::upload_route))
		.route(
			"/_media/v1/upload/{media_id}",
			put(client::media::upload_with_id_route),
		)
		.route(
			"/_media/v1/download/{server_name}/{media_id}",
			get(client::media::download_route),
		)
		.route(
			"/_media/v1/download/{server_name}/{media_id}/{filename}",
			get(client::media::download_as_filename_route),
		)
		.route(
			"/_media/v1/thumbnail/{server_name}/{media_id}",
			get(client::media::thumbnail_route),
		)
		.route("/_media/v1/preview_url", get(client::preview::preview_url_route))
		.route("/_media/v1/config", get(client::media::config_route))
		// federation
		.route(
			"/_federation/v1/media/download/{media_id}",
			get(server::media::download_route),
		)
		.route(
			"/_federation/v1/media/thumbnail/{media_id}",
			get(server::media::thumbnail_route),
		)
		// admin
		.route(
			"/_admin/v1/quarantine/{server_name}/{media_id}",
			post(admin::media::quarantine_route)
				.delete(admin::media::unquarantine_route),
		)
		.route("/_admin/v1/quarantine", get(admin::media::list_quarantined_route))
		.route("/_admin/v1/media", get(admin::media::list_media_route))
		.route(
			"/_admin/v1/media/remote",
			delete(admin::media::purge_remote_route),
		)
		.route(
			"/_admin/v1/media/user/{user_id}",
			delete(admin::media::purge_from_user_route),
		)
		.route(
			"/_admin/v1/media/hash/{hash}",
			delete(admin::media::purge_by_hash_route),
		)
		.route(
			"/_admin/v1/media/{server_name}/{media_id}",
			delete(admin::media::purge_route),
		)
}
