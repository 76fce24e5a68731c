use rand::{Rng, distributions::Alphanumeric, thread_rng};

/// Random url-safe string, used for generated media identifiers and
/// temporary file names.
#[must_use]
pub fn string(length: usize) -> String {
	thread_rng()
		.sample_iter(&Alphanumeric)
		.take(length)
		.map(char::from)
		.collect()
}

#[cfg(test)]
mod tests {
	#[test]
	fn string_has_requested_length_and_charset() {
		let s = super::string(32);
		assert_eq!(s.len(), 32);
		assert!(s.bytes().all(|b| b.is_ascii_alphanumeric()));
		assert_ne!(super::string(32), super::string(32));
	}
}
