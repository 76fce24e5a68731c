use axum::Json;
use serde_json::{Value, json};

/// # `GET /healthz`
///
/// Liveness probe; no authentication.
pub(crate) async fn healthz_route() -> Json<Value> {
	Json(json!({
		"ok": true,
		"status": "Probably not dead",
	}))
}
