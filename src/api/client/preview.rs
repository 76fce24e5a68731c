use axum::{
	Json,
	extract::{Query, State},
};
use axum_client_ip::InsecureClientIp;
use serde::Deserialize;
use serde_json::Value;
use url::Url;
use vellum_core::{Result, debug_warn, err};
use vellum_service::limits::{Principal, RouteClass};

use crate::auth::AuthedUser;

#[derive(Deserialize)]
pub(crate) struct PreviewParams {
	url: String,
	ts: Option<u64>,
}

/// # `GET /_media/v1/preview_url`
///
/// Returns an open-graph preview of the URL, cached per hour bucket.
#[tracing::instrument(skip_all, fields(%client), name = "url_preview", level = "debug")]
pub(crate) async fn preview_url_route(
	State(services): State<crate::State>,
	InsecureClientIp(client): InsecureClientIp,
	AuthedUser(user): AuthedUser,
	Query(params): Query<PreviewParams>,
) -> Result<Json<Value>> {
	services
		.limits
		.check(RouteClass::Preview, Principal::User(user.clone()))?;

	let url = Url::parse(&params.url).map_err(|e| {
		debug_warn!(%user, url = %params.url, "Requested URL is not valid: {e}");
		err!(Request(InvalidParam("Requested URL is not valid: {e}")))
	})?;

	if !services.media.url_preview_allowed(&url) {
		return Err(err!(Request(Forbidden(
			"URL is not allowed to be previewed"
		))));
	}

	let preview = services.media.get_url_preview(&url, params.ts).await?;

	Ok(Json(serde_json::to_value(&preview)?))
}
