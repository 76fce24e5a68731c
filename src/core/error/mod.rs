mod err;
mod kind;
mod response;

use std::{borrow::Cow, convert::Infallible, sync::PoisonError};

pub use self::kind::ErrorKind;

#[derive(thiserror::Error)]
pub enum Error {
	// std
	#[error(transparent)]
	Fmt(#[from] std::fmt::Error),
	#[error(transparent)]
	FromUtf8(#[from] std::string::FromUtf8Error),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	ParseInt(#[from] std::num::ParseIntError),
	#[error(transparent)]
	SystemTime(#[from] std::time::SystemTimeError),
	#[error(transparent)]
	TryFromInt(#[from] std::num::TryFromIntError),
	#[error(transparent)]
	Utf8(#[from] std::str::Utf8Error),

	// third-party
	#[error(transparent)]
	Clap(#[from] clap::error::Error),
	#[error(transparent)]
	Extension(#[from] axum::extract::rejection::ExtensionRejection),
	#[error(transparent)]
	Figment(#[from] figment::error::Error),
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	HttpHeader(#[from] http::header::InvalidHeaderValue),
	#[error("Image error: {0}")]
	Image(#[from] image::ImageError),
	#[error("Join error: {0}")]
	JoinError(#[from] tokio::task::JoinError),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error(transparent)]
	Path(#[from] axum::extract::rejection::PathRejection),
	#[error("Mutex poisoned: {0}")]
	Poison(Cow<'static, str>),
	#[error("Request error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	TomlDe(#[from] toml::de::Error),
	#[error("Tracing filter error: {0}")]
	TracingFilter(#[from] tracing_subscriber::filter::ParseError),
	#[error(transparent)]
	TypedHeader(#[from] axum_extra::typed_header::TypedHeaderRejection),
	#[error(transparent)]
	UrlParse(#[from] url::ParseError),

	// vellum
	#[error("{0}")]
	BadServerResponse(Cow<'static, str>),
	#[error("There was a problem with the '{0}' directive in your configuration: {1}")]
	Config(&'static str, Cow<'static, str>),
	#[error("{0}")]
	Conflict(Cow<'static, str>),
	#[error(transparent)]
	ContentDisposition(#[from] ruma::http_headers::ContentDispositionParseError),
	#[error("{0}")]
	Database(Cow<'static, str>),
	#[error(transparent)]
	Mxc(#[from] ruma::MxcUriError),
	#[error(transparent)]
	Mxid(#[from] ruma::IdParseError),
	#[error("{1}")]
	Request(ErrorKind, Cow<'static, str>),

	// unique / untyped
	#[error("{0}")]
	Err(Cow<'static, str>),
}

impl Error {
	#[inline]
	#[must_use]
	pub fn from_errno() -> Self { Self::Io(std::io::Error::last_os_error()) }

	/// Sanitizes public-facing errors that can leak sensitive information.
	pub fn sanitized_message(&self) -> String {
		match self {
			| Self::Database(..) => String::from("Database error occurred."),
			| Self::Io(..) => String::from("I/O error occurred."),
			| Self::Reqwest(..) => String::from("Upstream request failed."),
			| _ => self.message(),
		}
	}

	/// Generate the error message string.
	#[inline]
	pub fn message(&self) -> String { format!("{self}") }

	/// Reproduce this error for fan-out to additional receivers. Taxonomy
	/// variants survive intact; other variants degrade to their message.
	#[must_use]
	pub fn replicate(&self) -> Self {
		match self {
			| Self::Request(kind, msg) => Self::Request(kind.clone(), msg.clone()),
			| Self::Conflict(msg) => Self::Conflict(msg.clone()),
			| Self::Database(msg) => Self::Database(msg.clone()),
			| Self::BadServerResponse(msg) => Self::BadServerResponse(msg.clone()),
			| Self::Err(msg) => Self::Err(msg.clone()),
			| other => Self::Err(other.message().into()),
		}
	}

	/// Returns the abstract kind of this error within the taxonomy.
	#[inline]
	pub fn kind(&self) -> ErrorKind {
		match self {
			| Self::Request(kind, ..) => kind.clone(),
			| Self::Mxc(..) | Self::Mxid(..) | Self::ContentDisposition(..) =>
				ErrorKind::InvalidParam,
			| _ => ErrorKind::Unknown,
		}
	}

	/// Returns the HTTP error code or closest approximation based on error
	/// variant.
	pub fn status_code(&self) -> http::StatusCode {
		use http::StatusCode;

		match self {
			| Self::Request(kind, ..) => kind.status_code(),
			| Self::Mxc(..) | Self::Mxid(..) | Self::ContentDisposition(..) =>
				StatusCode::BAD_REQUEST,
			| Self::Conflict(..) => StatusCode::CONFLICT,
			| Self::Reqwest(error) => error
				.status()
				.map_or(StatusCode::BAD_GATEWAY, |status| {
					StatusCode::from_u16(status.as_u16())
						.unwrap_or(StatusCode::BAD_GATEWAY)
				}),
			| Self::Io(error) => response::io_error_code(error.kind()),
			| _ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The wire error code for the response envelope.
	#[inline]
	pub fn errcode(&self) -> &'static str { self.kind().errcode() }

	/// Returns true for "not found" errors. This means anything that qualifies
	/// as a "not found" from any variant's contained error type. This call is
	/// often used as a special case to eliminate a contained Option with a
	/// Result where Ok(None) is instead Err(e) if e.is_not_found().
	#[inline]
	pub fn is_not_found(&self) -> bool { self.status_code() == http::StatusCode::NOT_FOUND }
}

impl std::fmt::Debug for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message())
	}
}

impl<T> From<PoisonError<T>> for Error {
	#[cold]
	#[inline(never)]
	fn from(e: PoisonError<T>) -> Self { Self::Poison(e.to_string().into()) }
}

#[allow(clippy::fallible_impl_from)]
impl From<Infallible> for Error {
	#[cold]
	#[inline(never)]
	fn from(_e: Infallible) -> Self {
		panic!("infallible error should never exist");
	}
}
