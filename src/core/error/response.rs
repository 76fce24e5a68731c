use axum::{
	Json,
	response::{IntoResponse, Response},
};
use http::{StatusCode, header::RETRY_AFTER};
use serde::Serialize;

use super::{Error, ErrorKind};

/// Wire envelope for all error responses.
#[derive(Serialize)]
struct ErrorBody<'a> {
	errcode: &'static str,
	error: &'a str,
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status_code();
		let message = self.sanitized_message();
		let body = Json(ErrorBody { errcode: self.errcode(), error: &message });

		let mut response = (status, body).into_response();
		if let ErrorKind::LimitExceeded { retry_after: Some(retry_after) } = self.kind() {
			let secs = retry_after.as_secs().max(1).to_string();
			if let Ok(value) = secs.parse() {
				response
					.headers_mut()
					.insert(RETRY_AFTER, value);
			}
		}

		response
	}
}

pub(super) fn io_error_code(kind: std::io::ErrorKind) -> StatusCode {
	use std::io::ErrorKind;

	match kind {
		| ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
		| ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
		| ErrorKind::NotFound => StatusCode::NOT_FOUND,
		| ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
		| ErrorKind::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
		| ErrorKind::StorageFull => StatusCode::INSUFFICIENT_STORAGE,
		| ErrorKind::Interrupted
		| ErrorKind::UnexpectedEof
		| ErrorKind::BrokenPipe
		| ErrorKind::WouldBlock => StatusCode::SERVICE_UNAVAILABLE,
		| _ => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use http::StatusCode;

	use crate::{Error, ErrorKind, err};

	#[test]
	fn taxonomy_maps_to_status_and_errcode() {
		let e = err!(Request(NotFound("missing")));
		assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(e.errcode(), "M_NOT_FOUND");

		let e = err!(Request(TooLarge("too big")));
		assert_eq!(e.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
		assert_eq!(e.errcode(), "M_TOO_LARGE");

		let e = err!(Request(QuotaExceeded("over quota")));
		assert_eq!(e.status_code(), StatusCode::FORBIDDEN);
		assert_eq!(e.errcode(), "M_QUOTA_EXCEEDED");

		let e = err!(Request(Quarantined("blocked")));
		assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
		assert_eq!(e.errcode(), "M_NOT_FOUND");

		let e = err!(Request(RemoteTimeout("deadline")));
		assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);
	}

	#[test]
	fn limit_exceeded_carries_retry_after() {
		let e = Error::Request(
			ErrorKind::LimitExceeded { retry_after: Some(Duration::from_secs(5)) },
			"slow down".into(),
		);
		assert_eq!(e.status_code(), StatusCode::TOO_MANY_REQUESTS);
		assert_eq!(e.errcode(), "M_LIMIT_EXCEEDED");
	}

	#[test]
	fn sanitized_messages_hide_internals() {
		let e = err!(Database("secret table exploded"));
		assert_eq!(e.sanitized_message(), "Database error occurred.");
		assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
	}
}
