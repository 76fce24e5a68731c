mod engine;
mod exec;
mod raster;
mod vector;
mod waveform;

use std::{str::FromStr, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use lru_cache::LruCache;
use ruma::OwnedServerName;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vellum_core::{
	Error, Mxc, Result, config::ThumbnailSize, err,
	utils::{content_disposition::make_content_disposition, time::now_millis},
};

pub(super) use self::engine::Generated;
use super::{FileMeta, Service, data::ThumbnailRecord};

/// Resize semantics: `scale` letterboxes inside the box, `crop` fills it
/// and center-crops the overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
	Crop,
	Scale,
}

impl Method {
	#[must_use]
	pub(super) fn as_byte(self) -> u8 {
		match self {
			| Self::Crop => b'c',
			| Self::Scale => b's',
		}
	}
}

impl FromStr for Method {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			| "crop" => Ok(Self::Crop),
			| "scale" => Ok(Self::Scale),
			| other => Err(err!(Request(InvalidParam("Unknown method {other:?}")))),
		}
	}
}

/// A thumbnail identity: requested dimensions clamped onto the configured
/// list, the method, and whether animation was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
	pub width: u32,
	pub height: u32,
	pub method: Method,
	pub animated: bool,
}

impl Dim {
	/// Validate a raw request and clamp it onto the allowed dimension
	/// list. Requests outside the configured range are invalid input, not
	/// clamped.
	pub fn new(
		width: u32,
		height: u32,
		method: Option<Method>,
		animated: bool,
		sizes: &[ThumbnailSize],
	) -> Result<Self> {
		if width == 0 || height == 0 {
			return Err(err!(Request(InvalidParam(
				"Thumbnail dimensions must be nonzero"
			))));
		}

		let max_width = sizes.iter().map(|s| s.width).max().unwrap_or(0);
		let max_height = sizes.iter().map(|s| s.height).max().unwrap_or(0);
		if width > max_width || height > max_height {
			return Err(err!(Request(InvalidParam(
				"Requested {width}x{height} exceeds the allowed {max_width}x{max_height}"
			))));
		}

		let (width, height) = clamp(width, height, sizes);
		Ok(Self {
			width,
			height,
			method: method.unwrap_or(Method::Scale),
			animated,
		})
	}

	/// Output dimensions against a source: `scale` fits inside the box
	/// preserving aspect ratio; `crop` is exact.
	#[must_use]
	pub(super) fn output_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
		match self.method {
			| Method::Crop => (self.width, self.height),
			| Method::Scale => {
				let ratio =
					u64::from(source_width).saturating_mul(u64::from(self.height));
				let nratio =
					u64::from(self.width).saturating_mul(u64::from(source_height));

				if nratio <= ratio {
					let height = u64::from(source_height)
						.saturating_mul(u64::from(self.width))
						.checked_div(u64::from(source_width))
						.unwrap_or(1);
					(self.width, u32::try_from(height.max(1)).unwrap_or(u32::MAX))
				} else {
					let width = u64::from(source_width)
						.saturating_mul(u64::from(self.height))
						.checked_div(u64::from(source_height))
						.unwrap_or(1);
					(u32::try_from(width.max(1)).unwrap_or(u32::MAX), self.height)
				}
			},
		}
	}
}

/// Smallest configured pair whose area covers the request; area ties break
/// lexicographically on (width, height). When the request outgrows every
/// pair, the largest pair wins.
fn clamp(width: u32, height: u32, sizes: &[ThumbnailSize]) -> (u32, u32) {
	let requested = u64::from(width).saturating_mul(u64::from(height));

	let key = |s: &ThumbnailSize| {
		(u64::from(s.width).saturating_mul(u64::from(s.height)), s.width, s.height)
	};

	sizes
		.iter()
		.filter(|s| key(s).0 >= requested)
		.min_by_key(|s| key(s))
		.or_else(|| sizes.iter().max_by_key(|s| key(s)))
		.map(|s| (s.width, s.height))
		.unwrap_or((width, height))
}

/// Byte-bounded LRU over thumbnail payloads, keyed by the thumbnail's
/// content hash. Avoids blob-store round trips for hot, small thumbnails.
pub(super) struct ThumbnailMemoryCache {
	entries: LruCache<String, CachedThumbnail>,
	bytes: usize,
	capacity: usize,
}

#[derive(Clone)]
pub(super) struct CachedThumbnail {
	pub(super) bytes: Arc<Vec<u8>>,
	pub(super) content_type: String,
}

impl ThumbnailMemoryCache {
	pub(super) fn new(capacity: usize) -> Self {
		Self {
			entries: LruCache::new(usize::MAX),
			bytes: 0,
			capacity,
		}
	}

	pub(super) fn get(&mut self, hash: &str) -> Option<CachedThumbnail> {
		self.entries.get_mut(hash).cloned()
	}

	pub(super) fn insert(&mut self, hash: String, thumbnail: CachedThumbnail) {
		let size = thumbnail.bytes.len();
		if size > self.capacity / 8 {
			return;
		}

		if let Some(evicted) = self.entries.insert(hash, thumbnail) {
			self.bytes = self.bytes.saturating_sub(evicted.bytes.len());
		}

		self.bytes = self.bytes.saturating_add(size);
		while self.bytes > self.capacity {
			let Some((_, evicted)) = self.entries.remove_lru() else {
				break;
			};

			self.bytes = self.bytes.saturating_sub(evicted.bytes.len());
		}
	}

	pub(super) fn invalidate(&mut self, hash: &str) {
		if let Some(evicted) = self.entries.remove(hash) {
			self.bytes = self.bytes.saturating_sub(evicted.bytes.len());
		}
	}
}

impl Service {
	/// Serves a derived thumbnail, generating and persisting it on miss.
	/// Generation for one identity key is single-flight; concurrent
	/// requesters share the one result.
	#[tracing::instrument(
		name = "thumbnail",
		level = "debug",
		skip(self),
		fields(%mxc, ?dim),
	)]
	pub async fn get_thumbnail(
		self: &Arc<Self>,
		mxc: &Mxc<'_>,
		dim: &Dim,
	) -> Result<Option<FileMeta>> {
		let Some(record) = self.db.get_media(mxc)? else {
			return Ok(None);
		};

		self.check_quarantined(&record)?;

		if let Some(thumbnail) = self.db.get_thumbnail(mxc, dim)? {
			return Ok(Some(self.serve_thumbnail(thumbnail).await?));
		}

		let key = (mxc.server_name.to_owned(), mxc.media_id.to_owned(), *dim);
		let this = self.clone();
		let (origin, media_id, dim) = key.clone();
		let meta = self
			.thumbnail_flights
			.run(&key, async move {
				this.generate_and_store(origin, media_id, dim)
					.await
					.map(Arc::new)
			})
			.await?;

		Ok(Some((*meta).clone()))
	}

	async fn serve_thumbnail(&self, thumbnail: ThumbnailRecord) -> Result<FileMeta> {
		let cached = self
			.memory_cache
			.lock()?
			.get(&thumbnail.content_hash);

		let content = match cached {
			| Some(cached) => (*cached.bytes).clone(),
			| None => {
				let content = self.storage().get(&thumbnail.content_hash).await?;
				self.memory_cache.lock()?.insert(
					thumbnail.content_hash.clone(),
					CachedThumbnail {
						bytes: Arc::new(content.clone()),
						content_type: thumbnail.content_type.clone(),
					},
				);

				content
			},
		};

		Ok(self.thumbnail_meta(&thumbnail, content))
	}

	async fn generate_and_store(
		self: Arc<Self>,
		origin: OwnedServerName,
		media_id: String,
		dim: Dim,
	) -> Result<FileMeta> {
		let mxc = Mxc { server_name: origin.as_ref(), media_id: &media_id };

		// a prior flight may have landed between our lookup and this one
		if let Some(thumbnail) = self.db.get_thumbnail(&mxc, &dim)? {
			return self.serve_thumbnail(thumbnail).await;
		}

		let record = self
			.db
			.get_media(&mxc)?
			.ok_or_else(|| err!(Request(NotFound("Media not found."))))?;

		self.check_quarantined(&record)?;

		let source = self.storage().get(&record.content_hash).await?;
		let generated = self.generate(&record, source, &dim).await?;

		let (bytes, content_type) = match generated {
			| Generated::Bytes { bytes, content_type } => (bytes, content_type),
			| Generated::Passthrough =>
				return Ok(self.file_meta(
					record,
					Some(self.storage().get(&record.content_hash).await?),
				)),
		};

		let stream = futures::stream::once(futures::future::ready(Ok(Bytes::from(
			bytes.clone(),
		))))
		.boxed();

		let stored = self.storage().put(stream).await?;

		let thumbnail = ThumbnailRecord {
			origin: record.origin.clone(),
			media_id: record.media_id.clone(),
			dim,
			content_type: content_type.to_owned(),
			size: stored.size,
			content_hash: stored.hash,
			created: now_millis(),
		};

		{
			let _hash_lock = self.hash_locks.lock(&thumbnail.content_hash).await;
			self.db.create_thumbnail(&thumbnail)?;
		}

		debug!(
			hash = %thumbnail.content_hash,
			size = thumbnail.size,
			"Generated and persisted thumbnail"
		);

		self.memory_cache.lock()?.insert(
			thumbnail.content_hash.clone(),
			CachedThumbnail {
				bytes: Arc::new(bytes.clone()),
				content_type: thumbnail.content_type.clone(),
			},
		);

		Ok(self.thumbnail_meta(&thumbnail, bytes))
	}

	fn thumbnail_meta(&self, thumbnail: &ThumbnailRecord, content: Vec<u8>) -> FileMeta {
		let config = &self.services.server.config;

		FileMeta {
			content: Some(content),
			content_type: Some(thumbnail.content_type.clone()),
			content_disposition: Some(make_content_disposition(
				None,
				Some(&thumbnail.content_type),
				&config.media_forced_attachment_types,
				None,
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use vellum_core::config::ThumbnailSize;

	use super::{Dim, Method, clamp};

	fn sizes() -> Vec<ThumbnailSize> {
		[(32, 32), (96, 96), (320, 240), (640, 480), (800, 600)]
			.map(|(width, height)| ThumbnailSize { width, height })
			.to_vec()
	}

	#[test]
	fn clamps_to_smallest_covering_pair() {
		assert_eq!(clamp(20, 20, &sizes()), (32, 32));
		assert_eq!(clamp(32, 32, &sizes()), (32, 32));
		assert_eq!(clamp(33, 32, &sizes()), (96, 96));
		assert_eq!(clamp(100, 100, &sizes()), (320, 240));
		assert_eq!(clamp(500, 400, &sizes()), (640, 480));
	}

	#[test]
	fn oversized_requests_fall_to_the_largest_pair() {
		assert_eq!(clamp(799, 601, &sizes()), (800, 600));
	}

	#[test]
	fn area_ties_break_lexicographically() {
		let sizes = [(40, 60), (60, 40)]
			.map(|(width, height)| ThumbnailSize { width, height })
			.to_vec();

		assert_eq!(clamp(10, 10, &sizes), (40, 60));
	}

	#[test]
	fn rejects_zero_and_oversized_dimensions() {
		assert!(Dim::new(0, 96, None, false, &sizes()).is_err());
		assert!(Dim::new(96, 0, None, false, &sizes()).is_err());
		assert!(Dim::new(801, 10, None, false, &sizes()).is_err());
		assert!(Dim::new(10, 601, None, false, &sizes()).is_err());

		let dim = Dim::new(96, 96, None, false, &sizes()).unwrap();
		assert_eq!((dim.width, dim.height), (96, 96));
		assert_eq!(dim.method, Method::Scale);
	}

	#[test]
	fn scale_output_fits_inside_the_box() {
		let dim = Dim {
			width: 96,
			height: 96,
			method: Method::Scale,
			animated: false,
		};
		assert_eq!(dim.output_size(200, 100), (96, 48));
		assert_eq!(dim.output_size(100, 200), (48, 96));

		let crop = Dim { method: Method::Crop, ..dim };
		assert_eq!(crop.output_size(200, 100), (96, 96));
	}
}
