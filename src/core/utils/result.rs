use crate::Error;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Logs the contained error at debug level and discards it, flattening to an
/// Option. For paths where a failure is expected and handled by absence.
pub trait LogDebugErr<T> {
	fn log_debug_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Display> LogDebugErr<T> for Result<T, E> {
	#[inline]
	fn log_debug_err(self) -> Option<T> {
		self.inspect_err(|e| tracing::debug!("{e}")).ok()
	}
}
