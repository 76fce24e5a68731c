mod data;
mod ingest;
mod moderation;
mod preview;
mod remote;
pub mod storage;
#[cfg(test)]
mod tests;
pub mod thumbnail;

use std::{
	collections::HashMap,
	sync::{Arc, Mutex as StdMutex, OnceLock},
	time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use lru_cache::LruCache;
use ruma::{OwnedServerName, UserId, http_headers::ContentDisposition};
use tokio::sync::Semaphore;
use vellum_core::{
	Mxc, Result, debug, err,
	utils::{MutexMap, SingleFlight, content_disposition::make_content_disposition},
};

pub use self::{
	data::{MediaRecord, QuarantineRecord, ThumbnailRecord},
	ingest::IngestRequest,
	preview::UrlPreviewData,
	storage::MediaStorage,
	thumbnail::{Dim, Method},
};
use self::{data::Data, thumbnail::ThumbnailMemoryCache};
use crate::{service, services::OnceServices};

/// Payload bytes flowing through ingest; the pipeline never buffers the
/// whole object.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Cache control for immutable objects.
pub const CACHE_CONTROL_IMMUTABLE: &str = "public,max-age=31536000,immutable";

/// Default cross-origin resource policy.
pub const CORP_CROSS_ORIGIN: &str = "cross-origin";

#[derive(Clone, Debug)]
pub struct FileMeta {
	pub content: Option<Vec<u8>>,
	pub content_type: Option<String>,
	pub content_disposition: Option<ContentDisposition>,
}

pub struct Service {
	pub(super) db: Data,
	storage: OnceLock<Arc<dyn MediaStorage>>,

	/// Serializes metadata mutations per content hash.
	hash_locks: MutexMap<String, ()>,

	/// Serializes quota read-modify-writes per user.
	quota_locks: MutexMap<ruma::OwnedUserId, ()>,

	remote_flights: SingleFlight<(OwnedServerName, String), Arc<FileMeta>>,
	thumbnail_flights: SingleFlight<(OwnedServerName, String, Dim), Arc<FileMeta>>,
	preview_flights: SingleFlight<(String, u64), UrlPreviewData>,

	/// Expiring markers for remote items known not to exist.
	negative_cache: StdMutex<LruCache<(OwnedServerName, String), Instant>>,

	/// Per-origin concurrency ceilings for federation fetches.
	origin_limits: StdMutex<HashMap<OwnedServerName, Arc<Semaphore>>>,

	/// The thumbnail CPU pool: permits over the blocking pool.
	thumbnail_pool: Arc<Semaphore>,

	/// Byte-bounded hot tier for small thumbnails.
	memory_cache: StdMutex<ThumbnailMemoryCache>,

	denylist: Vec<ipaddress::IPAddress>,
	dns: hickory_resolver::TokioResolver,

	services: Arc<OnceServices>,
}

const NEGATIVE_CACHE_CAPACITY: usize = 1024;

#[async_trait]
impl crate::Service for Service {
	fn build(args: &crate::Args<'_>) -> Result<Arc<Self>> {
		let config = &args.server.config;

		let denylist = config
			.ip_range_denylist
			.iter()
			.map(|cidr| {
				ipaddress::IPAddress::parse(cidr.clone())
					.map_err(|e| err!(Config("ip_range_denylist", "{cidr:?}: {e}")))
			})
			.collect::<Result<Vec<_>>>()?;

		let dns = match hickory_resolver::TokioResolver::builder_tokio() {
			| Ok(builder) => builder.build(),
			| Err(e) => {
				debug!("No usable system resolver config ({e}); using defaults");
				hickory_resolver::TokioResolver::builder_with_config(
					hickory_resolver::config::ResolverConfig::default(),
					hickory_resolver::name_server::TokioConnectionProvider::default(),
				)
				.build()
			},
		};

		Ok(Arc::new(Self {
			db: Data::new(args.db),
			storage: OnceLock::new(),
			hash_locks: MutexMap::new(),
			quota_locks: MutexMap::new(),
			remote_flights: SingleFlight::new(),
			thumbnail_flights: SingleFlight::new(),
			preview_flights: SingleFlight::new(),
			negative_cache: StdMutex::new(LruCache::new(NEGATIVE_CACHE_CAPACITY)),
			origin_limits: StdMutex::new(HashMap::new()),
			thumbnail_pool: Arc::new(Semaphore::new(config.thumbnail_parallelism)),
			memory_cache: StdMutex::new(ThumbnailMemoryCache::new(
				config.thumbnail_cache_capacity,
			)),
			denylist,
			dns,
			services: args.services.clone(),
		}))
	}

	async fn worker(self: Arc<Self>) -> Result {
		let storage = storage::build(&self.services.server.config).await?;
		self.storage
			.set(storage)
			.map_err(|_| err!(Config("media_storage", "Storage already initialized")))?;

		Ok(())
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	/// Uploads a file from a local client.
	pub async fn upload(
		&self,
		user: Option<&UserId>,
		media_id: Option<String>,
		content_type: Option<&str>,
		filename: Option<&str>,
		declared_len: Option<u64>,
		stream: ByteStream,
	) -> Result<MediaRecord> {
		let origin = self.services.globals().server_name().to_owned();
		let request = IngestRequest {
			origin,
			media_id,
			uploader: user.map(ToOwned::to_owned),
			content_type: content_type.map(ToOwned::to_owned),
			filename: filename.map(ToOwned::to_owned),
			declared_len,
		};

		self.ingest(request, stream).await
	}

	/// Downloads a locally-known file. `Ok(None)` means the identifier is
	/// unknown here; quarantined media is an error, not absence.
	pub async fn get(&self, mxc: &Mxc<'_>) -> Result<Option<FileMeta>> {
		let Some(record) = self.db.get_media(mxc)? else {
			return Ok(None);
		};

		self.check_quarantined(&record)?;

		let content = self.storage().get(&record.content_hash).await?;

		Ok(Some(self.file_meta(record, Some(content))))
	}

	/// Metadata without the payload.
	pub fn get_metadata(&self, mxc: &Mxc<'_>) -> Result<Option<FileMeta>> {
		let Some(record) = self.db.get_media(mxc)? else {
			return Ok(None);
		};

		self.check_quarantined(&record)?;

		Ok(Some(self.file_meta(record, None)))
	}

	#[inline]
	pub fn exists(&self, mxc: &Mxc<'_>) -> Result<bool> {
		Ok(self.db.get_media(mxc)?.is_some())
	}

	pub(super) fn check_quarantined(&self, record: &MediaRecord) -> Result {
		if record.quarantined {
			let mxc = format!("mxc://{}/{}", record.origin, record.media_id);
			debug!(%mxc, "Denying access to quarantined media");
			return Err(err!(Request(Quarantined("Media is not available."))));
		}

		Ok(())
	}

	pub(super) fn file_meta(&self, record: MediaRecord, content: Option<Vec<u8>>) -> FileMeta {
		let config = &self.services.server.config;
		let content_disposition = make_content_disposition(
			None,
			record.content_type.as_deref(),
			&config.media_forced_attachment_types,
			record.upload_name.as_deref(),
		);

		FileMeta {
			content,
			content_type: record.content_type,
			content_disposition: Some(content_disposition),
		}
	}

	#[inline]
	pub(super) fn storage(&self) -> &Arc<dyn MediaStorage> {
		self.storage
			.get()
			.expect("media storage initialized by worker")
	}

	pub(super) fn origin_semaphore(&self, origin: &OwnedServerName) -> Arc<Semaphore> {
		let limit = self
			.services
			.server
			.config
			.federation_concurrency_per_origin;

		self.origin_limits
			.lock()
			.expect("origin limits locked")
			.entry(origin.clone())
			.or_insert_with(|| Arc::new(Semaphore::new(limit)))
			.clone()
	}
}
