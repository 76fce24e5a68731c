use std::sync::Arc;

use ruma::{OwnedServerName, OwnedUserId, ServerName, UserId};
use serde::{Deserialize, Serialize};
use vellum_core::{Err, Mxc, Result, err, utils::time::now_millis};
use vellum_database::{Database, Map, segments};

use super::{preview::UrlPreviewData, thumbnail::Dim};

/// One stored media item. Immutable after creation except `quarantined`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MediaRecord {
	pub origin: OwnedServerName,
	pub media_id: String,
	/// SHA-256 hex of the stored bytes; doubles as the blob location key.
	pub content_hash: String,
	pub size: u64,
	pub content_type: Option<String>,
	pub upload_name: Option<String>,
	pub uploader: Option<OwnedUserId>,
	/// Which storage backend holds the blob.
	pub datastore: String,
	pub quarantined: bool,
	pub created: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ThumbnailRecord {
	pub origin: OwnedServerName,
	pub media_id: String,
	pub dim: Dim,
	pub content_type: String,
	pub size: u64,
	pub content_hash: String,
	pub created: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FileHashRecord {
	pub size: u64,
	pub created: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuarantineRecord {
	pub reason: Option<String>,
	pub actor: Option<String>,
	pub at: u64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct QuotaRecord {
	pub bytes: u64,
	pub files: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(super) struct UrlPreviewRecord {
	pub data: UrlPreviewData,
	pub cached_at: u64,
}

pub(crate) struct Data {
	mediaid_meta: Arc<Map>,
	mediaid_quarantine: Arc<Map>,
	filehash_meta: Arc<Map>,
	filehash_mediaid: Arc<Map>,
	filehash_thumbnailid: Arc<Map>,
	thumbnailid_meta: Arc<Map>,
	user_mediaid: Arc<Map>,
	user_quota: Arc<Map>,
	url_preview: Arc<Map>,
	db: Arc<Database>,
}

impl Data {
	pub(super) fn new(db: &Arc<Database>) -> Self {
		Self {
			mediaid_meta: db["mediaid_meta"].clone(),
			mediaid_quarantine: db["mediaid_quarantine"].clone(),
			filehash_meta: db["filehash_meta"].clone(),
			filehash_mediaid: db["filehash_mediaid"].clone(),
			filehash_thumbnailid: db["filehash_thumbnailid"].clone(),
			thumbnailid_meta: db["thumbnailid_meta"].clone(),
			user_mediaid: db["user_mediaid"].clone(),
			user_quota: db["user_quota"].clone(),
			url_preview: db["url_preview"].clone(),
			db: db.clone(),
		}
	}

	/// Insert a new media record; every row lands in one write batch.
	/// Unique on (origin, media-id). The caller holds the content-hash lock
	/// and, when an uploader is present, that user's quota lock.
	pub(super) fn create_media(&self, record: &MediaRecord) -> Result {
		let key = mediaid_key(record.origin.as_ref(), &record.media_id);
		if self.mediaid_meta.contains(&key)? {
			return Err!(Conflict(
				"Media mxc://{}/{} already exists",
				record.origin,
				record.media_id
			));
		}

		let mut batch = self.db.batch();
		batch.insert(&self.mediaid_meta, &key, &serialize(record)?);

		batch.insert(
			&self.filehash_mediaid,
			&segments([
				record.content_hash.as_bytes(),
				record.origin.as_bytes(),
				record.media_id.as_bytes(),
			]),
			b"",
		);

		if !self
			.filehash_meta
			.contains(record.content_hash.as_bytes())?
		{
			let hash_record = FileHashRecord { size: record.size, created: record.created };
			batch.insert(
				&self.filehash_meta,
				record.content_hash.as_bytes(),
				&serialize(&hash_record)?,
			);
		}

		if let Some(uploader) = &record.uploader {
			batch.insert(
				&self.user_mediaid,
				&segments([
					uploader.as_bytes(),
					record.origin.as_bytes(),
					record.media_id.as_bytes(),
				]),
				b"",
			);

			let mut quota = self.quota(uploader)?;
			quota.bytes = quota.bytes.saturating_add(record.size);
			quota.files = quota.files.saturating_add(1);
			batch.insert(&self.user_quota, uploader.as_bytes(), &serialize(&quota)?);
		}

		batch.commit()
	}

	pub(super) fn get_media(&self, mxc: &Mxc<'_>) -> Result<Option<MediaRecord>> {
		self.mediaid_meta
			.get(&mediaid_key(mxc.server_name, mxc.media_id))?
			.map(|bytes| deserialize(&bytes))
			.transpose()
	}

	/// Flip the quarantine flag, keeping the moderation row and the
	/// uploader's quota in step within one batch. Quarantined bytes do not
	/// count against the uploader; lifting the quarantine counts them
	/// again. A no-op transition leaves the quota untouched. The caller
	/// holds the uploader's quota lock. Returns the updated record.
	pub(super) fn set_quarantine(
		&self,
		mxc: &Mxc<'_>,
		quarantine: Option<&QuarantineRecord>,
	) -> Result<MediaRecord> {
		let key = mediaid_key(mxc.server_name, mxc.media_id);
		let mut record: MediaRecord = self
			.mediaid_meta
			.get(&key)?
			.map(|bytes| deserialize(&bytes))
			.transpose()?
			.ok_or_else(|| err!(Request(NotFound("Media not found."))))?;

		let was_quarantined = record.quarantined;
		record.quarantined = quarantine.is_some();

		let mut batch = self.db.batch();
		batch.insert(&self.mediaid_meta, &key, &serialize(&record)?);
		match quarantine {
			| Some(row) => batch.insert(&self.mediaid_quarantine, &key, &serialize(row)?),
			| None => batch.remove(&self.mediaid_quarantine, &key),
		}

		if record.quarantined != was_quarantined {
			if let Some(uploader) = &record.uploader {
				let mut quota = self.quota(uploader)?;
				if record.quarantined {
					quota.bytes = quota.bytes.saturating_sub(record.size);
					quota.files = quota.files.saturating_sub(1);
				} else {
					quota.bytes = quota.bytes.saturating_add(record.size);
					quota.files = quota.files.saturating_add(1);
				}

				batch.insert(&self.user_quota, uploader.as_bytes(), &serialize(&quota)?);
			}
		}

		batch.commit()?;
		Ok(record)
	}

	pub(super) fn quarantine_row(&self, mxc: &Mxc<'_>) -> Result<Option<QuarantineRecord>> {
		self.mediaid_quarantine
			.get(&mediaid_key(mxc.server_name, mxc.media_id))?
			.map(|bytes| deserialize(&bytes))
			.transpose()
	}

	pub(super) fn list_quarantined(&self) -> Result<Vec<(String, QuarantineRecord)>> {
		self.mediaid_quarantine
			.scan_prefix(&[])?
			.into_iter()
			.map(|(key, val)| {
				let mxc = mxc_from_key(&key)?;
				Ok((mxc, deserialize(&val)?))
			})
			.collect()
	}

	/// Every (origin, media-id) sharing a content hash.
	pub(super) fn media_by_hash(&self, hash: &str) -> Result<Vec<(OwnedServerName, String)>> {
		let prefix = segments([hash.as_bytes(), &[]]);
		self.filehash_mediaid
			.scan_prefix(&prefix)?
			.into_iter()
			.map(|(key, _)| ids_from_hash_key(&key))
			.collect()
	}

	pub(super) fn user_media(&self, user: &UserId) -> Result<Vec<(OwnedServerName, String)>> {
		let prefix = segments([user.as_bytes(), &[]]);
		self.user_mediaid
			.scan_prefix(&prefix)?
			.into_iter()
			.map(|(key, _)| {
				let rest = &key[user.as_bytes().len().saturating_add(1)..];
				ids_from_hash_key_parts(rest)
			})
			.collect()
	}

	/// Full listing for the admin surface, optionally filtered by origin,
	/// uploader, content type, and creation time. Content types compare on
	/// the MIME essence, parameters stripped.
	pub(super) fn list_media(
		&self,
		origin: Option<&ServerName>,
		uploader: Option<&UserId>,
		content_type: Option<&str>,
		before: Option<u64>,
		after: Option<u64>,
	) -> Result<Vec<MediaRecord>> {
		let content_type = content_type.map(mime_essence);

		let mut out = Vec::new();
		for (_, val) in self.mediaid_meta.scan_prefix(&[])? {
			let record: MediaRecord = deserialize(&val)?;
			if origin.is_some_and(|origin| record.origin != origin) {
				continue;
			}

			if uploader.is_some_and(|uploader| {
				record.uploader.as_deref() != Some(uploader)
			}) {
				continue;
			}

			if content_type.as_deref().is_some_and(|wanted| {
				record
					.content_type
					.as_deref()
					.map(mime_essence)
					.as_deref() != Some(wanted)
			}) {
				continue;
			}

			if before.is_some_and(|before| record.created >= before)
				|| after.is_some_and(|after| record.created <= after)
			{
				continue;
			}

			out.push(record);
		}

		Ok(out)
	}

	pub(super) fn create_thumbnail(&self, record: &ThumbnailRecord) -> Result {
		let key = thumbnailid_key(record.origin.as_ref(), &record.media_id, &record.dim);

		let mut batch = self.db.batch();
		batch.insert(&self.thumbnailid_meta, &key, &serialize(record)?);

		let mut href = segments([record.content_hash.as_bytes(), &[]]);
		href.extend_from_slice(&key);
		batch.insert(&self.filehash_thumbnailid, &href, b"");

		if !self
			.filehash_meta
			.contains(record.content_hash.as_bytes())?
		{
			let hash_record = FileHashRecord { size: record.size, created: record.created };
			batch.insert(
				&self.filehash_meta,
				record.content_hash.as_bytes(),
				&serialize(&hash_record)?,
			);
		}

		batch.commit()
	}

	pub(super) fn get_thumbnail(
		&self,
		mxc: &Mxc<'_>,
		dim: &Dim,
	) -> Result<Option<ThumbnailRecord>> {
		self.thumbnailid_meta
			.get(&thumbnailid_key(mxc.server_name, mxc.media_id, dim))?
			.map(|bytes| deserialize(&bytes))
			.transpose()
	}

	pub(super) fn thumbnails_of(&self, mxc: &Mxc<'_>) -> Result<Vec<ThumbnailRecord>> {
		let mut prefix = mediaid_key(mxc.server_name, mxc.media_id);
		prefix.push(vellum_database::SEP);

		self.thumbnailid_meta
			.scan_prefix(&prefix)?
			.into_iter()
			.map(|(_, val)| deserialize(&val))
			.collect()
	}

	/// Remove a media record, its thumbnails, indexes, and quota charge in
	/// one batch. Returns the content hashes that no longer have any
	/// referent, whose blobs the caller should delete.
	pub(super) fn delete_media(&self, mxc: &Mxc<'_>) -> Result<Vec<String>> {
		let Some(record) = self.get_media(mxc)? else {
			return Err!(Request(NotFound("Media not found.")));
		};

		let thumbnails = self.thumbnails_of(mxc)?;
		let key = mediaid_key(mxc.server_name, mxc.media_id);

		let mut batch = self.db.batch();
		batch.remove(&self.mediaid_meta, &key);
		batch.remove(&self.mediaid_quarantine, &key);
		batch.remove(
			&self.filehash_mediaid,
			&segments([
				record.content_hash.as_bytes(),
				record.origin.as_bytes(),
				record.media_id.as_bytes(),
			]),
		);

		if let Some(uploader) = &record.uploader {
			batch.remove(
				&self.user_mediaid,
				&segments([
					uploader.as_bytes(),
					record.origin.as_bytes(),
					record.media_id.as_bytes(),
				]),
			);

			// quarantined bytes were already uncounted by set_quarantine
			if !record.quarantined {
				let mut quota = self.quota(uploader)?;
				quota.bytes = quota.bytes.saturating_sub(record.size);
				quota.files = quota.files.saturating_sub(1);
				batch.insert(&self.user_quota, uploader.as_bytes(), &serialize(&quota)?);
			}
		}

		for thumbnail in &thumbnails {
			let tkey =
				thumbnailid_key(thumbnail.origin.as_ref(), &thumbnail.media_id, &thumbnail.dim);
			batch.remove(&self.thumbnailid_meta, &tkey);

			let mut href = segments([thumbnail.content_hash.as_bytes(), &[]]);
			href.extend_from_slice(&tkey);
			batch.remove(&self.filehash_thumbnailid, &href);
		}

		batch.commit()?;

		let mut candidates: Vec<String> = thumbnails
			.into_iter()
			.map(|thumbnail| thumbnail.content_hash)
			.collect();
		candidates.push(record.content_hash);
		candidates.sort_unstable();
		candidates.dedup();

		let mut orphaned = Vec::new();
		for hash in candidates {
			if self.hash_reference_count(&hash)? == 0 {
				self.filehash_meta.remove(hash.as_bytes())?;
				orphaned.push(hash);
			}
		}

		Ok(orphaned)
	}

	/// Remove only the thumbnail rows of a source, returning orphaned
	/// thumbnail hashes.
	pub(super) fn delete_thumbnails(&self, mxc: &Mxc<'_>) -> Result<Vec<String>> {
		let thumbnails = self.thumbnails_of(mxc)?;

		let mut batch = self.db.batch();
		for thumbnail in &thumbnails {
			let tkey =
				thumbnailid_key(thumbnail.origin.as_ref(), &thumbnail.media_id, &thumbnail.dim);
			batch.remove(&self.thumbnailid_meta, &tkey);

			let mut href = segments([thumbnail.content_hash.as_bytes(), &[]]);
			href.extend_from_slice(&tkey);
			batch.remove(&self.filehash_thumbnailid, &href);
		}

		batch.commit()?;

		let mut orphaned = Vec::new();
		for thumbnail in thumbnails {
			if self.hash_reference_count(&thumbnail.content_hash)? == 0 {
				self.filehash_meta
					.remove(thumbnail.content_hash.as_bytes())?;
				orphaned.push(thumbnail.content_hash);
			}
		}

		orphaned.sort_unstable();
		orphaned.dedup();
		Ok(orphaned)
	}

	/// Live references to a content hash across media and thumbnails.
	pub(super) fn hash_reference_count(&self, hash: &str) -> Result<usize> {
		let prefix = segments([hash.as_bytes(), &[]]);
		let media = self.filehash_mediaid.count_prefix(&prefix)?;
		let thumbs = self.filehash_thumbnailid.count_prefix(&prefix)?;
		Ok(media.saturating_add(thumbs))
	}

	pub(super) fn quota(&self, user: &UserId) -> Result<QuotaRecord> {
		Ok(self
			.user_quota
			.get(user.as_bytes())?
			.map(|bytes| deserialize(&bytes))
			.transpose()?
			.unwrap_or_default())
	}

	pub(super) fn upsert_url_preview(
		&self,
		url: &str,
		bucket: u64,
		data: &UrlPreviewData,
	) -> Result {
		let record = UrlPreviewRecord { data: data.clone(), cached_at: now_millis() };
		self.url_preview
			.insert(&preview_key(url, bucket), &serialize(&record)?)
	}

	pub(super) fn get_url_preview(
		&self,
		url: &str,
		bucket: u64,
	) -> Result<Option<UrlPreviewData>> {
		Ok(self
			.url_preview
			.get(&preview_key(url, bucket))?
			.map(|bytes| deserialize::<UrlPreviewRecord>(&bytes))
			.transpose()?
			.map(|record| record.data))
	}
}

pub(super) fn mediaid_key(origin: &ServerName, media_id: &str) -> Vec<u8> {
	segments([origin.as_bytes(), media_id.as_bytes()])
}

/// MIME type with parameters stripped and case folded, the form content
/// types are compared in.
fn mime_essence(content_type: &str) -> String {
	content_type
		.split(';')
		.next()
		.unwrap_or(content_type)
		.trim()
		.to_ascii_lowercase()
}

fn thumbnailid_key(origin: &ServerName, media_id: &str, dim: &Dim) -> Vec<u8> {
	let mut key = mediaid_key(origin, media_id);
	key.push(vellum_database::SEP);
	key.extend_from_slice(&dim.width.to_be_bytes());
	key.push(vellum_database::SEP);
	key.extend_from_slice(&dim.height.to_be_bytes());
	key.push(vellum_database::SEP);
	key.push(dim.method.as_byte());
	key.push(vellum_database::SEP);
	key.push(u8::from(dim.animated));
	key
}

fn preview_key(url: &str, bucket: u64) -> Vec<u8> {
	let mut key = url.as_bytes().to_vec();
	key.push(vellum_database::SEP);
	key.extend_from_slice(&bucket.to_be_bytes());
	key
}

fn mxc_from_key(key: &[u8]) -> Result<String> {
	let mut parts = key.split(|&b| b == vellum_database::SEP);
	let origin = parts
		.next()
		.ok_or_else(|| err!(Database("short media key")))?;
	let media_id = parts
		.next()
		.ok_or_else(|| err!(Database("short media key")))?;

	Ok(format!(
		"mxc://{}/{}",
		vellum_core::utils::str_from_bytes(origin)?,
		vellum_core::utils::str_from_bytes(media_id)?,
	))
}

fn ids_from_hash_key(key: &[u8]) -> Result<(OwnedServerName, String)> {
	let mut parts = key.split(|&b| b == vellum_database::SEP);
	let _hash = parts
		.next()
		.ok_or_else(|| err!(Database("short hash index key")))?;

	let origin = parts
		.next()
		.ok_or_else(|| err!(Database("hash index key missing origin")))?;
	let media_id = parts
		.next()
		.ok_or_else(|| err!(Database("hash index key missing media id")))?;

	let origin = OwnedServerName::try_from(vellum_core::utils::str_from_bytes(origin)?)?;
	Ok((origin, vellum_core::utils::string_from_bytes(media_id)?))
}

fn ids_from_hash_key_parts(key: &[u8]) -> Result<(OwnedServerName, String)> {
	let mut parts = key.split(|&b| b == vellum_database::SEP);
	let origin = parts
		.next()
		.ok_or_else(|| err!(Database("user index key missing origin")))?;
	let media_id = parts
		.next()
		.ok_or_else(|| err!(Database("user index key missing media id")))?;

	let origin = OwnedServerName::try_from(vellum_core::utils::str_from_bytes(origin)?)?;
	Ok((origin, vellum_core::utils::string_from_bytes(media_id)?))
}

fn serialize<T: Serialize>(val: &T) -> Result<Vec<u8>> {
	serde_json::to_vec(val).map_err(|e| err!(Database("record serialization failed: {e}")))
}

fn deserialize<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
	serde_json::from_slice(bytes)
		.map_err(|e| err!(Database("record deserialization failed: {e}")))
}
