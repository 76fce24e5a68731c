use crate::{Result, err};

/// Checked conversion for sizes crossing the database (u64) / in-memory
/// (usize) boundary.
#[inline]
pub fn usize_from_u64(val: u64) -> Result<usize> {
	usize::try_from(val).map_err(|_| err!("u64 {val} does not fit in usize"))
}

#[inline]
#[must_use]
#[allow(clippy::as_conversions)]
pub fn u64_from_usize(val: usize) -> u64 { val as u64 }
