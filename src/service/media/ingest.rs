use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use ruma::{OwnedServerName, OwnedUserId};
use tracing::debug;
use vellum_core::{
	Error, Mxc, Result, err,
	utils::{random_string, time::now_millis},
};

use super::{ByteStream, MediaRecord, Service};

/// Bytes inspected for content-type sniffing.
const SNIFF_LENGTH: usize = 1024;

/// Attempts to mint a fresh media id before giving up on collisions.
const ID_ATTEMPTS: usize = 3;

/// One ingest: an incoming byte stream plus everything known about it
/// up front. `media_id` is set on the importer and federation paths and
/// generated otherwise.
#[derive(Debug)]
pub struct IngestRequest {
	pub origin: OwnedServerName,
	pub media_id: Option<String>,
	pub uploader: Option<OwnedUserId>,
	pub content_type: Option<String>,
	pub filename: Option<String>,
	pub declared_len: Option<u64>,
}

impl Service {
	/// Runs the ingest pipeline: cap enforcement, streaming hash and store,
	/// content-type sniffing, then record insertion under the per-hash
	/// lock. Yields the canonical record.
	#[tracing::instrument(
		name = "ingest",
		level = "debug",
		skip(self, stream),
		fields(origin = %request.origin),
	)]
	pub(super) async fn ingest(
		&self,
		request: IngestRequest,
		stream: ByteStream,
	) -> Result<MediaRecord> {
		let config = &self.services.server.config;
		let max = config.max_upload_size as u64;

		if request.declared_len.is_some_and(|len| len > max) {
			return Err(err!(Request(TooLarge(
				"Upload of {} bytes exceeds the {max} byte limit",
				request.declared_len.unwrap_or_default(),
			))));
		}

		if let Some(uploader) = &request.uploader {
			self.check_quota(uploader, request.declared_len.unwrap_or(0))?;
		}

		let head = Arc::new(StdMutex::new(Vec::new()));
		let stored = self
			.storage()
			.put(capped(stream, max, head.clone()))
			.await?;

		let content_type = effective_content_type(
			&head.lock().expect("sniff head locked"),
			request.content_type.as_deref(),
		);

		let _hash_lock = self.hash_locks.lock(&stored.hash).await;

		if let Some(uploader) = &request.uploader {
			let _quota_lock = self.quota_locks.lock(uploader).await;
			if let Err(e) = self.check_quota(uploader, stored.size) {
				self.remove_blob_if_orphaned(&stored.hash).await;
				return Err(e);
			}

			return self
				.insert_record(&request, &stored, content_type, uploader.clone())
				.await;
		}

		self.insert_record_inner(&request, &stored, content_type)
			.await
	}

	async fn insert_record(
		&self,
		request: &IngestRequest,
		stored: &super::storage::StoredObject,
		content_type: Option<String>,
		uploader: OwnedUserId,
	) -> Result<MediaRecord> {
		let config = &self.services.server.config;

		// policy knob: identical bytes by the same user may share one id
		if !config.media_unique_ids_per_upload {
			for (origin, media_id) in self.db.media_by_hash(&stored.hash)? {
				let mxc = Mxc { server_name: origin.as_ref(), media_id: &media_id };
				if let Some(existing) = self.db.get_media(&mxc)? {
					if existing.uploader.as_deref() == Some(uploader.as_ref())
						&& !existing.quarantined
					{
						debug!(%mxc, "Reusing identifier for identical re-upload");
						return Ok(existing);
					}
				}
			}
		}

		self.insert_record_inner(request, stored, content_type)
			.await
	}

	async fn insert_record_inner(
		&self,
		request: &IngestRequest,
		stored: &super::storage::StoredObject,
		content_type: Option<String>,
	) -> Result<MediaRecord> {
		let config = &self.services.server.config;
		let supplied = request.media_id.is_some();

		let mut attempts = 0;
		loop {
			let media_id = request
				.media_id
				.clone()
				.unwrap_or_else(|| random_string(config.media_id_length));

			let record = MediaRecord {
				origin: request.origin.clone(),
				media_id,
				content_hash: stored.hash.clone(),
				size: stored.size,
				content_type: content_type.clone(),
				upload_name: request.filename.clone(),
				uploader: request.uploader.clone(),
				datastore: self.storage().name().to_owned(),
				quarantined: false,
				created: now_millis(),
			};

			match self.db.create_media(&record) {
				| Ok(()) => return Ok(record),
				| Err(Error::Conflict(message)) => {
					if supplied {
						return Err(Error::Conflict(message));
					}

					attempts += 1;
					if attempts >= ID_ATTEMPTS {
						return Err(err!(Database(
							"Exhausted media id attempts: {message}"
						)));
					}
				},
				| Err(e) => return Err(e),
			}
		}
	}

	/// Snapshot quota check against the configured per-user caps.
	pub(super) fn check_quota(&self, user: &OwnedUserId, incoming: u64) -> Result {
		let config = &self.services.server.config;
		if !self.services.globals().user_is_local(user) {
			return Ok(());
		}

		let quota = self.db.quota(user)?;

		if config
			.user_quota_bytes
			.is_some_and(|cap| quota.bytes.saturating_add(incoming) > cap)
		{
			return Err(err!(Request(QuotaExceeded(
				"Storing {incoming} more bytes would exceed the user quota"
			))));
		}

		if config
			.user_quota_files
			.is_some_and(|cap| quota.files >= cap)
		{
			return Err(err!(Request(QuotaExceeded(
				"User has reached the stored upload count quota"
			))));
		}

		Ok(())
	}

	/// Deletes a just-stored blob that gained no metadata referent.
	pub(super) async fn remove_blob_if_orphaned(&self, hash: &str) {
		match self.db.hash_reference_count(hash) {
			| Ok(0) =>
				if let Err(e) = self.storage().delete(hash).await {
					debug!("Failed deleting orphaned blob {hash}: {e}");
				},
			| Ok(_) => {},
			| Err(e) => debug!("Failed counting referents of blob {hash}: {e}"),
		}
	}
}

/// Wraps the payload stream: enforces the byte cap by short-circuiting on
/// overflow and captures the head for sniffing as bytes pass through.
fn capped(
	stream: ByteStream,
	limit: u64,
	head: Arc<StdMutex<Vec<u8>>>,
) -> ByteStream {
	stream
		.scan(0_u64, move |count, chunk| {
			let item = match chunk {
				| Ok(bytes) => {
					*count = count.saturating_add(bytes.len() as u64);
					if *count > limit {
						Err(err!(Request(TooLarge(
							"Payload exceeds the {limit} byte limit"
						))))
					} else {
						let mut head = head.lock().expect("sniff head locked");
						if head.len() < SNIFF_LENGTH {
							let take =
								(SNIFF_LENGTH - head.len()).min(bytes.len());
							head.extend_from_slice(&bytes[..take]);
						}

						Ok(bytes)
					}
				},
				| Err(e) => Err(e),
			};

			futures::future::ready(Some(item))
		})
		.boxed()
}

/// The declared type wins unless it is missing or generic and the bytes
/// identify themselves otherwise.
pub(super) fn effective_content_type(
	head: &[u8],
	declared: Option<&str>,
) -> Option<String> {
	let generic = match declared {
		| None | Some("") | Some("application/octet-stream") => true,
		| Some(_) => false,
	};

	if !generic {
		return declared.map(ToOwned::to_owned);
	}

	infer::get(head)
		.map(|kind| kind.mime_type().to_owned())
		.or_else(|| declared.map(ToOwned::to_owned))
}
