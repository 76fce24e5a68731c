/// Available system cores for pool sizing; never zero.
#[must_use]
pub fn available_parallelism() -> usize {
	std::thread::available_parallelism()
		.map(std::num::NonZeroUsize::get)
		.unwrap_or(1)
}
