use std::{fmt, sync::Arc};

use rocksdb::{BoundColumnFamily, Direction, IteratorMode};
use vellum_core::{Result, err};

use crate::Engine;

pub struct Map {
	name: &'static str,
	engine: Arc<Engine>,
}

impl Map {
	pub(crate) fn open(engine: &Arc<Engine>, name: &'static str) -> Result<Arc<Self>> {
		Ok(Arc::new(Self { name, engine: engine.clone() }))
	}

	#[inline]
	pub fn name(&self) -> &str { self.name }

	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.engine
			.db
			.get_cf(&self.cf(), key)
			.map_err(|e| err!(Database("{}: get failed: {e}", self.name)))
	}

	pub fn contains(&self, key: &[u8]) -> Result<bool> {
		Ok(self.get(key)?.is_some())
	}

	pub fn insert(&self, key: &[u8], val: &[u8]) -> Result {
		self.engine
			.db
			.put_cf(&self.cf(), key, val)
			.map_err(|e| err!(Database("{}: insert failed: {e}", self.name)))
	}

	pub fn remove(&self, key: &[u8]) -> Result {
		self.engine
			.db
			.delete_cf(&self.cf(), key)
			.map_err(|e| err!(Database("{}: remove failed: {e}", self.name)))
	}

	/// All entries whose key begins with the prefix, in key order.
	pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
		let mode = IteratorMode::From(prefix, Direction::Forward);
		let mut out = Vec::new();
		for item in self.engine.db.iterator_cf(&self.cf(), mode) {
			let (key, val) =
				item.map_err(|e| err!(Database("{}: iterator failed: {e}", self.name)))?;
			if !key.starts_with(prefix) {
				break;
			}

			out.push((key.into_vec(), val.into_vec()));
		}

		Ok(out)
	}

	/// Number of entries under the prefix; drives reference counting.
	pub fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
		Ok(self.scan_prefix(prefix)?.len())
	}

	pub(crate) fn cf(&self) -> Arc<BoundColumnFamily<'_>> {
		self.engine
			.db
			.cf_handle(self.name)
			.expect("column family exists for opened map")
	}
}

impl fmt::Debug for Map {
	fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(out, "Map {{name: {0}}}", self.name)
	}
}

impl fmt::Display for Map {
	fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result { write!(out, "{0}", self.name) }
}
