//! Log macros which elevate their level in debug builds. In release builds
//! these log at `debug` level to keep operator output quiet; during
//! development the named level applies.

#[macro_export]
macro_rules! debug_error {
	($($x:tt)+) => {
		if cfg!(debug_assertions) {
			::tracing::error!($($x)+);
		} else {
			::tracing::debug!($($x)+);
		}
	}
}

#[macro_export]
macro_rules! debug_warn {
	($($x:tt)+) => {
		if cfg!(debug_assertions) {
			::tracing::warn!($($x)+);
		} else {
			::tracing::debug!($($x)+);
		}
	}
}

#[macro_export]
macro_rules! debug_info {
	($($x:tt)+) => {
		if cfg!(debug_assertions) {
			::tracing::info!($($x)+);
		} else {
			::tracing::debug!($($x)+);
		}
	}
}
