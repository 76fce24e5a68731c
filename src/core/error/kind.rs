use std::{fmt, time::Duration};

use http::StatusCode;

/// Abstract failure taxonomy for request-scoped errors. The adapter layer
/// maps each kind onto an HTTP status and a wire error code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	Forbidden,
	InvalidParam,
	LimitExceeded { retry_after: Option<Duration> },
	MissingToken,
	NotFound,
	Quarantined,
	QuotaExceeded,
	RemoteNotFound,
	RemoteRefused,
	RemoteTimeout,
	TooLarge,
	Unknown,
	UnknownToken,
	Unrecognized,
	Untrusted,
}

impl ErrorKind {
	#[must_use]
	pub fn errcode(&self) -> &'static str {
		match self {
			| Self::Forbidden => "M_FORBIDDEN",
			| Self::InvalidParam => "M_INVALID_PARAM",
			| Self::LimitExceeded { .. } => "M_LIMIT_EXCEEDED",
			| Self::MissingToken => "M_MISSING_TOKEN",
			| Self::NotFound | Self::Quarantined | Self::RemoteNotFound => "M_NOT_FOUND",
			| Self::QuotaExceeded => "M_QUOTA_EXCEEDED",
			| Self::TooLarge => "M_TOO_LARGE",
			| Self::UnknownToken => "M_UNKNOWN_TOKEN",
			| Self::Unrecognized => "M_UNRECOGNIZED",
			| Self::RemoteRefused
			| Self::RemoteTimeout
			| Self::Untrusted
			| Self::Unknown => "M_UNKNOWN",
		}
	}

	#[must_use]
	pub fn status_code(&self) -> StatusCode {
		match self {
			| Self::Forbidden | Self::QuotaExceeded => StatusCode::FORBIDDEN,
			| Self::InvalidParam => StatusCode::BAD_REQUEST,
			| Self::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
			| Self::MissingToken | Self::UnknownToken => StatusCode::UNAUTHORIZED,
			| Self::NotFound | Self::Quarantined | Self::RemoteNotFound =>
				StatusCode::NOT_FOUND,
			| Self::RemoteRefused | Self::RemoteTimeout | Self::Untrusted =>
				StatusCode::BAD_GATEWAY,
			| Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
			| Self::Unrecognized => StatusCode::METHOD_NOT_ALLOWED,
			| Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.errcode())
	}
}
