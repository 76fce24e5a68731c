use ruma::{OwnedServerName, UserId};
use tracing::{info, warn};
use vellum_core::{Err, Mxc, Result, utils::time::now_millis};

use super::{MediaRecord, QuarantineRecord, Service};

impl Service {
	/// Marks the media as quarantined. Serving and thumbnail derivation
	/// deny immediately; metadata and blobs stay in place, the bytes stop
	/// counting against the uploader's quota, and cached thumbnails are
	/// dropped from the memory tier.
	#[tracing::instrument(skip(self), fields(%mxc))]
	pub async fn quarantine(
		&self,
		mxc: &Mxc<'_>,
		reason: Option<String>,
		actor: Option<String>,
	) -> Result {
		let Some(record) = self.db.get_media(mxc)? else {
			return Err!(Request(NotFound("Media not found.")));
		};

		let _hash_lock = self.hash_locks.lock(&record.content_hash).await;
		let _quota_lock = match &record.uploader {
			| Some(uploader) => Some(self.quota_locks.lock(uploader).await),
			| None => None,
		};

		let row = QuarantineRecord { reason, actor, at: now_millis() };
		self.db.set_quarantine(mxc, Some(&row))?;
		self.evict_cached_thumbnails(mxc)?;

		info!(%mxc, "Media quarantined");
		Ok(())
	}

	/// Lifts a quarantine; the media serves again without re-ingestion and
	/// its bytes count against the uploader's quota once more.
	#[tracing::instrument(skip(self), fields(%mxc))]
	pub async fn unquarantine(&self, mxc: &Mxc<'_>) -> Result {
		let Some(record) = self.db.get_media(mxc)? else {
			return Err!(Request(NotFound("Media not found.")));
		};

		let _hash_lock = self.hash_locks.lock(&record.content_hash).await;
		let _quota_lock = match &record.uploader {
			| Some(uploader) => Some(self.quota_locks.lock(uploader).await),
			| None => None,
		};

		self.db.set_quarantine(mxc, None)?;

		info!(%mxc, "Media unquarantined");
		Ok(())
	}

	pub fn quarantine_reason(&self, mxc: &Mxc<'_>) -> Result<Option<QuarantineRecord>> {
		self.db.quarantine_row(mxc)
	}

	pub fn list_quarantined(&self) -> Result<Vec<(String, QuarantineRecord)>> {
		self.db.list_quarantined()
	}

	/// Irreversibly removes the record, its thumbnails, and, when the
	/// last referent goes, the blobs themselves.
	#[tracing::instrument(skip(self), fields(%mxc))]
	pub async fn purge(&self, mxc: &Mxc<'_>) -> Result {
		let Some(record) = self.db.get_media(mxc)? else {
			return Err!(Request(NotFound("Media not found.")));
		};

		let _hash_lock = self.hash_locks.lock(&record.content_hash).await;

		self.evict_cached_thumbnails(mxc)?;
		let orphaned = if let Some(uploader) = record.uploader.clone() {
			let _quota_lock = self.quota_locks.lock(&uploader).await;
			self.db.delete_media(mxc)?
		} else {
			self.db.delete_media(mxc)?
		};

		for hash in orphaned {
			if let Err(e) = self.storage().delete(&hash).await {
				warn!(%mxc, %hash, "Failed deleting unreferenced blob: {e}");
			}
		}

		info!(%mxc, "Media purged");
		Ok(())
	}

	/// Purges every record sharing a content hash; the blob is guaranteed
	/// gone afterwards. Returns how many records fell.
	#[tracing::instrument(skip(self))]
	pub async fn purge_by_content_hash(&self, hash: &str) -> Result<usize> {
		let referents = self.db.media_by_hash(hash)?;
		if referents.is_empty() {
			return Err!(Request(NotFound("No media stores that content hash.")));
		}

		let mut purged = 0;
		for (origin, media_id) in referents {
			let mxc = Mxc { server_name: origin.as_ref(), media_id: &media_id };
			match self.purge(&mxc).await {
				| Ok(()) => purged += 1,
				| Err(e) if e.is_not_found() => {},
				| Err(e) => return Err(e),
			}
		}

		Ok(purged)
	}

	/// Purges all media uploaded by a user. Failures on individual items
	/// are logged and skipped so one stuck item cannot wedge the sweep.
	#[tracing::instrument(skip(self), fields(%user))]
	pub async fn purge_from_user(&self, user: &UserId) -> Result<usize> {
		let mut purged = 0;
		for (origin, media_id) in self.db.user_media(user)? {
			let mxc = Mxc { server_name: origin.as_ref(), media_id: &media_id };
			match self.purge(&mxc).await {
				| Ok(()) => purged += 1,
				| Err(e) => warn!(%mxc, "Failed purging user media: {e}"),
			}
		}

		Ok(purged)
	}

	/// Purges remote-origin media created before the cutoff.
	#[tracing::instrument(skip(self))]
	pub async fn purge_remote_before(&self, cutoff_ms: u64) -> Result<usize> {
		let ours = self.services.globals().server_name().to_owned();

		let mut purged = 0;
		for record in self
			.db
			.list_media(None, None, None, Some(cutoff_ms), None)?
		{
			if record.origin == ours {
				continue;
			}

			let mxc =
				Mxc { server_name: record.origin.as_ref(), media_id: &record.media_id };
			match self.purge(&mxc).await {
				| Ok(()) => purged += 1,
				| Err(e) => warn!(%mxc, "Failed purging remote media: {e}"),
			}
		}

		Ok(purged)
	}

	pub fn list_media(
		&self,
		origin: Option<&OwnedServerName>,
		uploader: Option<&UserId>,
		content_type: Option<&str>,
		before: Option<u64>,
		after: Option<u64>,
	) -> Result<Vec<MediaRecord>> {
		self.db.list_media(
			origin.map(AsRef::as_ref),
			uploader,
			content_type,
			before,
			after,
		)
	}

	/// Drop a source's thumbnails from the in-memory tier; their records
	/// and blobs are untouched.
	fn evict_cached_thumbnails(&self, mxc: &Mxc<'_>) -> Result {
		let thumbnails = self.db.thumbnails_of(mxc)?;
		let mut cache = self.memory_cache.lock()?;
		for thumbnail in thumbnails {
			cache.invalidate(&thumbnail.content_hash);
		}

		Ok(())
	}
}
