use crate::{Result, err};

/// Parse a counter value out of big-endian database bytes.
pub fn u64_from_bytes(bytes: &[u8]) -> Result<u64> {
	let array: [u8; 8] = bytes
		.try_into()
		.map_err(|_| err!(Database("expected 8 bytes, found {}", bytes.len())))?;

	Ok(u64::from_be_bytes(array))
}

#[inline]
#[must_use]
pub fn u64_to_bytes(val: u64) -> [u8; 8] { val.to_be_bytes() }

#[cfg(test)]
mod tests {
	#[test]
	fn u64_round_trip() {
		let bytes = super::u64_to_bytes(0xDEAD_BEEF_0042);
		assert_eq!(super::u64_from_bytes(&bytes).unwrap(), 0xDEAD_BEEF_0042);
		assert!(super::u64_from_bytes(&bytes[..7]).is_err());
	}
}
