use crate::Result;

/// Parse bytes into string without copying.
#[inline]
pub fn str_from_bytes(bytes: &[u8]) -> Result<&str> {
	Ok(std::str::from_utf8(bytes)?)
}

/// Parse bytes into an owned string.
#[inline]
pub fn string_from_bytes(bytes: &[u8]) -> Result<String> {
	Ok(String::from_utf8(bytes.to_vec())?)
}
