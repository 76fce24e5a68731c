use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use http::StatusCode;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use tracing::{debug, trace};
use vellum_core::{Err, Result, config::S3StorageConfig, err, utils::Sha256Sink};

use super::{MediaStorage, StoredObject};
use crate::media::ByteStream;

/// S3-compatible object store driven through presigned requests. Objects
/// are keyed by content hash under the configured prefix; the spool for an
/// incoming stream is in memory, bounded upstream by the upload cap.
pub struct S3Storage {
	bucket: Bucket,
	credentials: Credentials,
	prefix: Option<String>,
	sign_duration: Duration,
	client: reqwest::Client,
}

impl S3Storage {
	pub(crate) fn new(config: &S3StorageConfig) -> Result<Self> {
		let style = if config.path_style { UrlStyle::Path } else { UrlStyle::VirtualHost };
		let bucket = Bucket::new(
			config.endpoint.clone(),
			style,
			config.bucket.clone(),
			config.region.clone(),
		)
		.map_err(|e| err!(Config("media_storage", "Invalid S3 endpoint: {e}")))?;

		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(60))
			.build()?;

		Ok(Self {
			bucket,
			credentials: Credentials::new(config.key.clone(), config.secret.clone()),
			prefix: config.path.clone(),
			sign_duration: Duration::from_secs(config.request_duration),
			client,
		})
	}

	fn object_name(&self, hash: &str) -> String {
		match &self.prefix {
			| Some(prefix) => format!("{}/{hash}", prefix.trim_end_matches('/')),
			| None => hash.to_owned(),
		}
	}

	async fn head(&self, hash: &str) -> Result<Option<u64>> {
		let object = self.object_name(hash);
		let action = self
			.bucket
			.head_object(Some(&self.credentials), &object);
		let url = action.sign(self.sign_duration);

		let response = self.client.head(url).send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}

		if !response.status().is_success() {
			return Err!(BadServerResponse(
				"S3 HEAD for {object:?} failed with {}",
				response.status()
			));
		}

		let length = response
			.headers()
			.get(http::header::CONTENT_LENGTH)
			.and_then(|val| val.to_str().ok())
			.and_then(|val| val.parse::<u64>().ok());

		Ok(Some(length.unwrap_or_default()))
	}
}

#[async_trait]
impl MediaStorage for S3Storage {
	fn name(&self) -> &'static str { "s3" }

	async fn put(&self, mut stream: ByteStream) -> Result<StoredObject> {
		let mut sink = Sha256Sink::new();
		let mut spool = Vec::new();
		while let Some(chunk) = stream.next().await {
			let chunk = chunk?;
			sink.update(&chunk);
			spool.extend_from_slice(&chunk);
		}

		let (hash, size) = sink.finalize();

		if let Some(existing) = self.head(&hash).await? {
			// idempotent dedup: verify the stored copy and skip the upload
			if existing != size {
				return Err!(Database(
					"S3 object {hash} has length {existing} but incoming stream hashed \
					 identically at length {size}"
				));
			}

			trace!(%hash, size, "Deduplicated S3 put");
			return Ok(StoredObject { hash, size });
		}

		let object = self.object_name(&hash);
		let action = self
			.bucket
			.put_object(Some(&self.credentials), &object);
		let url = action.sign(self.sign_duration);

		let response = self.client.put(url).body(spool).send().await?;
		if !response.status().is_success() {
			return Err!(BadServerResponse(
				"S3 PUT for {object:?} failed with {}",
				response.status()
			));
		}

		debug!(%hash, size, "Stored blob in S3");
		Ok(StoredObject { hash, size })
	}

	async fn get(&self, hash: &str) -> Result<Vec<u8>> {
		let object = self.object_name(hash);
		let action = self
			.bucket
			.get_object(Some(&self.credentials), &object);
		let url = action.sign(self.sign_duration);

		let response = self.client.get(url).send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			return Err(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("S3 object {object:?} does not exist"),
			)
			.into());
		}

		if !response.status().is_success() {
			return Err!(BadServerResponse(
				"S3 GET for {object:?} failed with {}",
				response.status()
			));
		}

		Ok(response.bytes().await?.to_vec())
	}

	async fn delete(&self, hash: &str) -> Result {
		let object = self.object_name(hash);
		let action = self
			.bucket
			.delete_object(Some(&self.credentials), &object);
		let url = action.sign(self.sign_duration);

		let response = self.client.delete(url).send().await?;
		if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
			return Err!(BadServerResponse(
				"S3 DELETE for {object:?} failed with {}",
				response.status()
			));
		}

		Ok(())
	}

	async fn exists(&self, hash: &str) -> Result<bool> {
		Ok(self.head(hash).await?.is_some())
	}
}
