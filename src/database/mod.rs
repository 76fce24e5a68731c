mod engine;
mod map;
pub mod maps;
#[cfg(test)]
mod tests;

use std::{ops::Index, sync::Arc};

use vellum_core::{Result, Server, err};

pub use self::{
	engine::{Batch, Engine},
	map::Map,
};
use crate::maps::Maps;

/// Key segment separator within a column. Values stored by the service
/// layer are serialized records; keys are `0xFF`-joined segments.
pub const SEP: u8 = 0xFF;

pub struct Database {
	maps: Maps,
	pub engine: Arc<Engine>,
}

impl Database {
	/// Load an existing database or create a new one.
	pub async fn open(server: &Arc<Server>) -> Result<Arc<Self>> {
		let engine = Engine::open(server, maps::MAPS)?;
		Ok(Arc::new(Self {
			maps: maps::open(&engine)?,
			engine,
		}))
	}

	#[inline]
	pub fn get(&self, name: &str) -> Result<&Arc<Map>> {
		self.maps
			.get(name)
			.ok_or_else(|| err!(Request(NotFound("column not found"))))
	}

	/// Begin an atomic multi-column write.
	#[inline]
	#[must_use]
	pub fn batch(&self) -> Batch<'_> { self.engine.batch() }

	#[inline]
	pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &Arc<Map>)> + Send + '_ {
		self.maps.iter()
	}
}

impl Index<&str> for Database {
	type Output = Arc<Map>;

	fn index(&self, name: &str) -> &Self::Output {
		self.maps
			.get(name)
			.expect("column in database does not exist")
	}
}

/// Join key segments with the separator.
#[must_use]
pub fn segments<'a, I>(parts: I) -> Vec<u8>
where
	I: IntoIterator<Item = &'a [u8]>,
{
	let mut key = Vec::new();
	for (i, part) in parts.into_iter().enumerate() {
		if i > 0 {
			key.push(SEP);
		}

		key.extend_from_slice(part);
	}

	key
}
