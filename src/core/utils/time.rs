use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
#[must_use]
#[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
pub fn now_millis() -> u64 {
	UNIX_EPOCH
		.elapsed()
		.expect("positive duration after epoch")
		.as_millis() as u64
}

#[inline]
#[must_use]
pub fn now_secs() -> u64 {
	UNIX_EPOCH
		.elapsed()
		.expect("positive duration after epoch")
		.as_secs()
}

/// Rounds a millisecond timestamp down to its hour, the cache bucket used
/// by URL preview records.
#[inline]
#[must_use]
pub fn hour_bucket(ts_millis: u64) -> u64 {
	const HOUR_MS: u64 = 60 * 60 * 1000;

	ts_millis - (ts_millis % HOUR_MS)
}

#[inline]
#[must_use]
pub fn now() -> SystemTime { SystemTime::now() }

#[cfg(test)]
mod tests {
	#[test]
	fn hour_bucket_rounds_down() {
		assert_eq!(super::hour_bucket(0), 0);
		assert_eq!(super::hour_bucket(3_599_999), 0);
		assert_eq!(super::hour_bucket(3_600_000), 3_600_000);
		assert_eq!(super::hour_bucket(7_199_999), 3_600_000);
	}
}
