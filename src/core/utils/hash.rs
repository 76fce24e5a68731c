use sha2::{Digest, Sha256};

/// Hex SHA-256 of a complete buffer.
#[must_use]
pub fn sha256_hex(buf: &[u8]) -> String { hex::encode(Sha256::digest(buf)) }

/// Incremental SHA-256 for streaming ingest; fed chunk-by-chunk so the
/// payload is never buffered whole for hashing.
#[derive(Default)]
pub struct Sha256Sink {
	hasher: Sha256,
	len: u64,
}

impl Sha256Sink {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	#[inline]
	pub fn update(&mut self, chunk: &[u8]) {
		self.hasher.update(chunk);
		self.len = self.len.saturating_add(chunk.len() as u64);
	}

	#[inline]
	#[must_use]
	pub fn len(&self) -> u64 { self.len }

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool { self.len == 0 }

	/// Consumes the sink, yielding the hex digest and total byte count.
	#[must_use]
	pub fn finalize(self) -> (String, u64) { (hex::encode(self.hasher.finalize()), self.len) }
}

#[cfg(test)]
mod tests {
	use super::{Sha256Sink, sha256_hex};

	#[test]
	fn incremental_matches_oneshot() {
		let payload = b"the quick brown fox jumps over the lazy dog";
		let mut sink = Sha256Sink::new();
		for chunk in payload.chunks(7) {
			sink.update(chunk);
		}

		let (hash, len) = sink.finalize();
		assert_eq!(len, payload.len() as u64);
		assert_eq!(hash, sha256_hex(payload));
	}
}
