//! Error construction macros. The general forms are:
//!
//! - `err!(Request(NotFound("no such media {mxc}")))` for taxonomy errors,
//! - `err!(Config("field", "explanation"))`, `err!(Database("…"))`,
//!   `err!(BadServerResponse("…"))` for the named variants,
//! - `err!("free-form {message}")` for the untyped catch-all.
//!
//! `Err!(…)` is the same but wrapped in `Result::Err`.

#[macro_export]
macro_rules! err {
	(Config($item:literal, $($args:tt)+)) => {
		$crate::error::Error::Config($item, ::std::format!($($args)+).into())
	};

	(Database($($args:tt)+)) => {
		$crate::error::Error::Database(::std::format!($($args)+).into())
	};

	(BadServerResponse($($args:tt)+)) => {
		$crate::error::Error::BadServerResponse(::std::format!($($args)+).into())
	};

	(Conflict($($args:tt)+)) => {
		$crate::error::Error::Conflict(::std::format!($($args)+).into())
	};

	(Request($kind:ident($($args:tt)+))) => {
		$crate::error::Error::Request(
			$crate::error::ErrorKind::$kind,
			::std::format!($($args)+).into(),
		)
	};

	($($args:tt)+) => {
		$crate::error::Error::Err(::std::format!($($args)+).into())
	};
}

#[macro_export]
macro_rules! Err {
	($($args:tt)+) => {
		Err($crate::err!($($args)+))
	};
}
