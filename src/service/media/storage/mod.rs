pub mod filesystem;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vellum_core::{Config, Result, config::MediaStorageConfig};

use super::ByteStream;

/// Outcome of a blob put: where the bytes now live. The hash is the
/// location key; a repeat put of identical bytes is a no-op.
#[derive(Clone, Debug)]
pub struct StoredObject {
	pub hash: String,
	pub size: u64,
}

/// Content-addressed blob storage. `put` must stream-hash without
/// buffering the whole object where the backend allows it, land bytes in a
/// temporary location, and atomically promote them under the hash-derived
/// key. A put colliding with an existing object verifies the stored size
/// and discards the new copy.
#[async_trait]
pub trait MediaStorage: Send + Sync {
	fn name(&self) -> &'static str;

	async fn put(&self, stream: ByteStream) -> Result<StoredObject>;

	async fn get(&self, hash: &str) -> Result<Vec<u8>>;

	async fn delete(&self, hash: &str) -> Result;

	async fn exists(&self, hash: &str) -> Result<bool>;
}

/// Build the configured storage backend.
pub(super) async fn build(config: &Config) -> Result<Arc<dyn MediaStorage>> {
	match &config.media_storage {
		| MediaStorageConfig::Filesystem { path, directory_structure } => {
			debug!("Initializing filesystem media storage");
			let root = path
				.clone()
				.unwrap_or_else(|| config.database_path.join("media"));

			let storage =
				filesystem::FilesystemStorage::new(root, *directory_structure).await?;
			Ok(Arc::new(storage))
		},

		| MediaStorageConfig::S3(s3_config) => {
			debug!("Initializing S3 media storage");
			let storage = s3::S3Storage::new(s3_config)?;
			Ok(Arc::new(storage))
		},
	}
}
