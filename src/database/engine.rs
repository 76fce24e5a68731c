use std::{
	collections::BTreeSet,
	sync::Arc,
};

use rocksdb::{
	ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, MultiThreaded, Options,
	WriteBatch,
};
use tracing::{debug, info, warn};
use vellum_core::{Result, Server, err};

use crate::map::Map;

pub(crate) type Db = DBWithThreadMode<MultiThreaded>;

pub struct Engine {
	pub(crate) db: Db,
}

impl Engine {
	#[tracing::instrument(skip_all)]
	pub(crate) fn open(server: &Arc<Server>, columns: &[&'static str]) -> Result<Arc<Self>> {
		let config = &server.config;
		let path = &config.database_path;

		let mut db_opts = Options::default();
		db_opts.create_if_missing(true);
		db_opts.create_missing_column_families(true);
		db_opts.set_max_open_files(config.rocksdb_max_open_files);
		db_opts.set_compression_type(DBCompressionType::Lz4);
		db_opts.increase_parallelism(
			i32::try_from(vellum_core::utils::available_parallelism()).unwrap_or(2),
		);

		let existing = Self::discover_cfs(path, &db_opts);
		for name in &existing {
			if name != "default" && !columns.contains(&name.as_str()) {
				warn!("Found undescribed column {name:?} in existing database.");
			}
		}

		let load_time = std::time::Instant::now();
		let cfds: Vec<_> = columns
			.iter()
			.map(|&name| ColumnFamilyDescriptor::new(name, Options::default()))
			.chain(
				existing
					.iter()
					.filter(|name| {
						name.as_str() != "default"
							&& !columns.contains(&name.as_str())
					})
					.map(|name| {
						ColumnFamilyDescriptor::new(name.clone(), Options::default())
					}),
			)
			.collect();

		debug!("Opening database at {path:?} with {} columns...", cfds.len());
		let db = Db::open_cf_descriptors(&db_opts, path, cfds)
			.map_err(|e| err!(Database("Failed to open database at {path:?}: {e}")))?;

		info!(
			columns = columns.len(),
			sequence = %db.latest_sequence_number(),
			time = ?load_time.elapsed(),
			"Opened database."
		);

		Ok(Arc::new(Self { db }))
	}

	#[must_use]
	pub fn batch(&self) -> Batch<'_> {
		Batch {
			engine: self,
			batch: WriteBatch::default(),
		}
	}

	pub fn flush(&self) -> Result {
		self.db
			.flush()
			.map_err(|e| err!(Database("flush failed: {e}")))
	}

	fn discover_cfs(path: &std::path::Path, opts: &Options) -> BTreeSet<String> {
		Db::list_cf(opts, path)
			.unwrap_or_default()
			.into_iter()
			.collect::<BTreeSet<_>>()
	}
}

/// Atomic multi-column write; all inserts and removes land together or not
/// at all.
pub struct Batch<'a> {
	engine: &'a Engine,
	batch: WriteBatch,
}

impl Batch<'_> {
	pub fn insert(&mut self, map: &Map, key: &[u8], val: &[u8]) {
		let cf = map.cf();
		self.batch.put_cf(&cf, key, val);
	}

	pub fn remove(&mut self, map: &Map, key: &[u8]) {
		let cf = map.cf();
		self.batch.delete_cf(&cf, key);
	}

	pub fn commit(self) -> Result {
		self.engine
			.db
			.write(self.batch)
			.map_err(|e| err!(Database("write batch failed: {e}")))
	}
}
