use std::fmt;

use ruma::{MxcUri, ServerName};

use crate::{Result, err};

/// Borrowed parts of an `mxc://` content identifier.
///
/// The owned form throughout the codebase is the `(OwnedServerName, String)`
/// pair; this type exists so call sites can pass the parts around without
/// reassembling the URI string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mxc<'a> {
	pub server_name: &'a ServerName,
	pub media_id: &'a str,
}

impl<'a> Mxc<'a> {
	/// Parses `mxc://<server-name>/<media-id>`, rejecting anything not
	/// matching the grammar.
	pub fn parse(uri: &'a str) -> Result<Self> {
		let mxc = <&MxcUri>::from(uri);
		let (server_name, media_id) = mxc.parts()?;
		if media_id.is_empty() || !valid_media_id(media_id) {
			return Err(err!(Request(InvalidParam(
				"Media ID contains invalid characters"
			))));
		}

		Ok(Self { server_name, media_id })
	}

	/// Validates a bare media-id as supplied on a path segment.
	pub fn validate_media_id(media_id: &str) -> Result<()> {
		if media_id.is_empty() || !valid_media_id(media_id) {
			return Err(err!(Request(InvalidParam(
				"Media ID contains invalid characters"
			))));
		}

		Ok(())
	}
}

impl fmt::Display for Mxc<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "mxc://{}/{}", self.server_name, self.media_id)
	}
}

fn valid_media_id(media_id: &str) -> bool {
	media_id
		.bytes()
		.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

#[cfg(test)]
mod tests {
	use super::Mxc;

	#[test]
	fn parses_well_formed_uris() {
		let mxc = Mxc::parse("mxc://example.com/AbCdEf0123-_").expect("valid mxc");
		assert_eq!(mxc.server_name.as_str(), "example.com");
		assert_eq!(mxc.media_id, "AbCdEf0123-_");
		assert_eq!(mxc.to_string(), "mxc://example.com/AbCdEf0123-_");
	}

	#[test]
	fn rejects_malformed_uris() {
		assert!(Mxc::parse("https://example.com/abc").is_err());
		assert!(Mxc::parse("mxc://example.com").is_err());
		assert!(Mxc::parse("mxc:///abc").is_err());
		assert!(Mxc::parse("mxc://example.com/with space").is_err());
		assert!(Mxc::parse("mxc://example.com/slash/inside").is_err());
	}

	#[test]
	fn validates_bare_media_ids() {
		assert!(Mxc::validate_media_id("AbC-_0").is_ok());
		assert!(Mxc::validate_media_id("").is_err());
		assert!(Mxc::validate_media_id("a/b").is_err());
		assert!(Mxc::validate_media_id("a b").is_err());
	}
}
