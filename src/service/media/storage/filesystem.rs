use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
	fs,
	io::AsyncWriteExt,
};
use tracing::{debug, trace};
use vellum_core::{
	Err, Result, debug_warn,
	config::DirectoryStructure,
	utils::{Sha256Sink, random_string},
};

use super::{MediaStorage, StoredObject};
use crate::media::ByteStream;

const TMP_DIR: &str = "tmp";

/// Hash-addressed blob tree on the local filesystem, sharded into
/// subdirectories by hash prefix. Writes stream into a temp file and are
/// promoted by atomic rename.
pub struct FilesystemStorage {
	root: PathBuf,
	structure: DirectoryStructure,
}

impl FilesystemStorage {
	pub(crate) async fn new(root: PathBuf, structure: DirectoryStructure) -> Result<Self> {
		let tmp = root.join(TMP_DIR);
		fs::create_dir_all(&tmp).await?;

		// stale spool files from interrupted ingests are garbage
		let mut entries = fs::read_dir(&tmp).await?;
		while let Ok(Some(entry)) = entries.next_entry().await {
			debug!(path = ?entry.path(), "Sweeping stale ingest temporary");
			fs::remove_file(entry.path()).await.ok();
		}

		Ok(Self { root, structure })
	}

	/// `ab/cd/abcdef…` path for a hash, per the configured sharding.
	fn blob_path(&self, hash: &str) -> Result<PathBuf> {
		let depth = usize::from(self.structure.depth);
		let length = usize::from(self.structure.length);
		if hash.len() < depth.saturating_mul(length).saturating_add(1) {
			return Err!(Database("location key {hash:?} is too short to shard"));
		}

		let mut path = self.root.clone();
		for level in 0..depth {
			let start = level * length;
			path.push(&hash[start..start + length]);
		}

		path.push(hash);
		Ok(path)
	}

	fn tmp_path(&self) -> PathBuf {
		self.root
			.join(TMP_DIR)
			.join(random_string(24))
	}
}

#[async_trait]
impl MediaStorage for FilesystemStorage {
	fn name(&self) -> &'static str { "filesystem" }

	async fn put(&self, mut stream: ByteStream) -> Result<StoredObject> {
		let tmp = self.tmp_path();
		let mut file = fs::File::create(&tmp).await?;
		let mut sink = Sha256Sink::new();

		while let Some(chunk) = stream.next().await {
			let chunk = match chunk {
				| Ok(chunk) => chunk,
				| Err(e) => {
					drop(file);
					fs::remove_file(&tmp).await.ok();
					return Err(e);
				},
			};

			sink.update(&chunk);
			if let Err(e) = file.write_all(&chunk).await {
				drop(file);
				fs::remove_file(&tmp).await.ok();
				return Err(e.into());
			}
		}

		file.sync_all().await?;
		drop(file);

		let (hash, size) = sink.finalize();
		let path = self.blob_path(&hash)?;

		match fs::metadata(&path).await {
			| Ok(existing) => {
				// idempotent dedup: verify then discard the new copy
				fs::remove_file(&tmp).await.ok();
				if existing.len() != size {
					return Err!(Database(
						"Stored object {hash} has length {} but incoming stream hashed \
						 identically at length {size}",
						existing.len(),
					));
				}

				trace!(%hash, size, "Deduplicated blob put");
			},
			| Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				if let Some(parent) = path.parent() {
					fs::create_dir_all(parent).await?;
				}

				fs::rename(&tmp, &path).await?;
				debug!(%hash, size, "Stored blob");
			},
			| Err(e) => {
				fs::remove_file(&tmp).await.ok();
				return Err(e.into());
			},
		}

		Ok(StoredObject { hash, size })
	}

	async fn get(&self, hash: &str) -> Result<Vec<u8>> {
		let path = self.blob_path(hash)?;
		Ok(fs::read(&path).await?)
	}

	async fn delete(&self, hash: &str) -> Result {
		let mut path = self.blob_path(hash)?;
		if let Err(e) = fs::remove_file(&path).await {
			if e.kind() != std::io::ErrorKind::NotFound {
				return Err(e.into());
			}
		}

		// prune now-empty shard directories
		for _ in 0..self.structure.depth {
			path.pop();
			match fs::remove_dir(&path).await {
				| Ok(()) => {},
				| Err(e)
					if matches!(
						e.kind(),
						std::io::ErrorKind::DirectoryNotEmpty
							| std::io::ErrorKind::NotFound
					) =>
					break,
				| Err(e) => {
					debug_warn!("Failed pruning empty blob directory: {e}");
					break;
				},
			}
		}

		Ok(())
	}

	async fn exists(&self, hash: &str) -> Result<bool> {
		Ok(fs::try_exists(self.blob_path(hash)?).await?)
	}
}
