use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use futures::{StreamExt, TryStreamExt};
use http::StatusCode;
use ruma::{OwnedServerName, http_headers::ContentDisposition};
use tracing::debug;
use vellum_core::{Error, Mxc, Result, debug_warn, err};

use super::{FileMeta, IngestRequest, Service};

impl Service {
	/// Materializes `mxc` from its origin server. Always single-flight per
	/// (origin, media-id); a per-origin concurrency ceiling and the total
	/// federation timeout apply. Permanent not-founds are negative-cached
	/// for a bounded TTL to shield the origin from retries.
	#[tracing::instrument(
		name = "fetch_remote",
		level = "debug",
		skip(self),
		fields(%mxc),
	)]
	pub async fn fetch_remote_content(
		self: &Arc<Self>,
		mxc: &Mxc<'_>,
	) -> Result<Arc<FileMeta>> {
		let config = &self.services.server.config;
		if !config.allow_federation {
			return Err(err!(Request(Forbidden("Federation is disabled."))));
		}

		let key = (mxc.server_name.to_owned(), mxc.media_id.to_owned());
		if self.negative_cached(&key) {
			return Err(err!(Request(RemoteNotFound(
				"{mxc} is known to not exist upstream"
			))));
		}

		let this = self.clone();
		let (origin, media_id) = key.clone();
		self.remote_flights
			.run(&key, async move {
				this.fetch_remote_inner(origin, media_id)
					.await
					.map(Arc::new)
			})
			.await
	}

	async fn fetch_remote_inner(
		self: Arc<Self>,
		origin: OwnedServerName,
		media_id: String,
	) -> Result<FileMeta> {
		let config = &self.services.server.config;
		let deadline = Duration::from_secs(config.federation_timeout);

		let semaphore = self.origin_semaphore(&origin);
		let _permit = semaphore
			.acquire()
			.await
			.map_err(|_| err!("origin semaphore closed"))?;

		let record = tokio::time::timeout(
			deadline,
			self.download_and_ingest(&origin, &media_id),
		)
		.await
		.map_err(|_| {
			err!(Request(RemoteTimeout("Fetching {origin}/{media_id} timed out")))
		})??;

		self.check_quarantined(&record)?;

		let content = self.storage().get(&record.content_hash).await?;
		Ok(self.file_meta(record, Some(content)))
	}

	async fn download_and_ingest(
		&self,
		origin: &OwnedServerName,
		media_id: &str,
	) -> Result<super::MediaRecord> {
		let config = &self.services.server.config;

		let base_url = self.services.resolver().resolve(origin).await?;
		let url = base_url
			.join(&format!("/_federation/v1/media/download/{media_id}"))?;

		let mut request = self.services.client().federation.get(url);
		if let Some(secret) = config.federation_secrets.get(origin) {
			request = request.bearer_auth(secret);
		}

		let response = request.send().await.map_err(map_fetch_error)?;
		match response.status() {
			| StatusCode::NOT_FOUND | StatusCode::GONE => {
				self.remember_negative(origin, media_id);
				return Err(err!(Request(RemoteNotFound(
					"{origin} does not have {media_id}"
				))));
			},
			| StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
				return Err(err!(Request(RemoteRefused(
					"{origin} refused to serve {media_id}"
				))));
			},
			| status if !status.is_success() => {
				return Err(err!(BadServerResponse(
					"{origin} responded with {status} for {media_id}"
				)));
			},
			| _ => {},
		}

		let content_type = response
			.headers()
			.get(http::header::CONTENT_TYPE)
			.and_then(|val| val.to_str().ok())
			.map(ToOwned::to_owned);

		let filename = response
			.headers()
			.get(http::header::CONTENT_DISPOSITION)
			.and_then(|val| val.to_str().ok())
			.and_then(|val| val.parse::<ContentDisposition>().ok())
			.and_then(|disposition| disposition.filename);

		let stream = response
			.bytes_stream()
			.map_err(Error::from)
			.boxed();

		let ingest = IngestRequest {
			origin: origin.clone(),
			media_id: Some(media_id.to_owned()),
			uploader: None,
			content_type,
			filename,
			declared_len: None,
		};

		match self.ingest(ingest, stream).await {
			| Ok(record) => Ok(record),
			| Err(Error::Conflict(..)) => {
				// lost a race with another materialization of the same item
				let mxc = Mxc { server_name: origin.as_ref(), media_id };
				debug!(%mxc, "Remote item landed concurrently; using existing record");
				self.db
					.get_media(&mxc)?
					.ok_or_else(|| err!(Database("record vanished after conflict")))
			},
			| Err(e) => Err(e),
		}
	}

	pub(super) fn negative_cached(&self, key: &(OwnedServerName, String)) -> bool {
		let mut cache = self
			.negative_cache
			.lock()
			.expect("negative cache locked");

		let now = Instant::now();
		if cache
			.get_mut(key)
			.is_some_and(|expires| *expires > now)
		{
			return true;
		}

		cache.remove(key);
		false
	}

	pub(super) fn remember_negative(&self, origin: &OwnedServerName, media_id: &str) {
		let ttl = Duration::from_secs(
			self.services
				.server
				.config
				.federation_negative_cache_ttl,
		);

		debug_warn!(%origin, %media_id, "Negative-caching remote media for {ttl:?}");
		self.negative_cache
			.lock()
			.expect("negative cache locked")
			.insert(
				(origin.clone(), media_id.to_owned()),
				Instant::now() + ttl,
			);
	}
}

/// Classify transport failures into the federation taxonomy.
fn map_fetch_error(e: reqwest::Error) -> Error {
	if e.is_timeout() {
		return err!(Request(RemoteTimeout("Remote fetch timed out: {e}")));
	}

	if e.is_connect() {
		return err!(Request(Untrusted("Could not establish a trusted connection: {e}")));
	}

	e.into()
}
