pub mod bytes;
pub mod content_disposition;
pub mod hash;
pub mod math;
pub mod mutex_map;
pub mod rand;
pub mod result;
pub mod single_flight;
pub mod string;
pub mod sys;
pub mod time;

pub use self::{
	bytes::{u64_from_bytes, u64_to_bytes},
	hash::{sha256_hex, Sha256Sink},
	mutex_map::{Guard as MutexMapGuard, MutexMap},
	rand::string as random_string,
	single_flight::SingleFlight,
	string::{str_from_bytes, string_from_bytes},
	sys::available_parallelism,
	time::now_millis as millis_since_unix_epoch,
};

#[inline]
pub fn exchange<T>(state: &mut T, source: T) -> T { std::mem::replace(state, source) }
