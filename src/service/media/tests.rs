use std::sync::Arc;

use ruma::{OwnedServerName, OwnedUserId};
use vellum_core::Mxc;

use super::{
	MediaRecord, QuarantineRecord,
	ingest::effective_content_type,
	thumbnail::{CachedThumbnail, Dim, Method, ThumbnailMemoryCache},
};
use crate::services::tests::services;

fn origin() -> OwnedServerName { "test.local".try_into().expect("valid server name") }

fn user(localpart: &str) -> OwnedUserId {
	format!("@{localpart}:test.local")
		.try_into()
		.expect("valid user id")
}

fn record(media_id: &str, hash: &str, size: u64, uploader: Option<OwnedUserId>) -> MediaRecord {
	MediaRecord {
		origin: origin(),
		media_id: media_id.to_owned(),
		content_hash: hash.to_owned(),
		size,
		content_type: Some("image/png".to_owned()),
		upload_name: None,
		uploader,
		datastore: "filesystem".to_owned(),
		quarantined: false,
		created: 1_700_000_000_000,
	}
}

#[test]
fn media_records_round_trip_and_ids_are_unique() {
	let media = services().media.clone();

	let r = record("roundtrip1", "hash-roundtrip", 42, None);
	media.db.create_media(&r).expect("create succeeds");

	let mxc = Mxc { server_name: &origin(), media_id: "roundtrip1" };
	let loaded = media
		.db
		.get_media(&mxc)
		.expect("lookup succeeds")
		.expect("record present");
	assert_eq!(loaded.content_hash, "hash-roundtrip");
	assert_eq!(loaded.size, 42);

	// unique on (origin, media-id)
	assert!(media.db.create_media(&r).is_err());
}

#[test]
fn shared_hash_reference_counting_drives_orphaning() {
	let media = services().media.clone();

	let a = record("refcount-a", "hash-shared", 10, None);
	let b = record("refcount-b", "hash-shared", 10, None);
	media.db.create_media(&a).unwrap();
	media.db.create_media(&b).unwrap();

	assert_eq!(media.db.hash_reference_count("hash-shared").unwrap(), 2);

	let mxc_a = Mxc { server_name: &origin(), media_id: "refcount-a" };
	let orphaned = media.db.delete_media(&mxc_a).unwrap();
	assert!(orphaned.is_empty(), "blob must survive while a referent remains");

	let mxc_b = Mxc { server_name: &origin(), media_id: "refcount-b" };
	let orphaned = media.db.delete_media(&mxc_b).unwrap();
	assert_eq!(orphaned, vec!["hash-shared".to_owned()]);
	assert_eq!(media.db.hash_reference_count("hash-shared").unwrap(), 0);
}

#[test]
fn quarantine_round_trips_through_the_flag_and_row() {
	let media = services().media.clone();

	let r = record("quarantine1", "hash-quarantine", 5, None);
	media.db.create_media(&r).unwrap();

	let mxc = Mxc { server_name: &origin(), media_id: "quarantine1" };
	let row = QuarantineRecord {
		reason: Some("test".to_owned()),
		actor: Some("@admin:test.local".to_owned()),
		at: 1,
	};

	let updated = media.db.set_quarantine(&mxc, Some(&row)).unwrap();
	assert!(updated.quarantined);
	assert!(media.check_quarantined(&updated).is_err());
	assert!(media.db.quarantine_row(&mxc).unwrap().is_some());

	let updated = media.db.set_quarantine(&mxc, None).unwrap();
	assert!(!updated.quarantined);
	assert!(media.db.quarantine_row(&mxc).unwrap().is_none());
}

#[test]
fn quota_tracks_creation_and_deletion() {
	let media = services().media.clone();
	let uploader = user("quota-user");

	let r1 = record("quota-1", "hash-quota-1", 100, Some(uploader.clone()));
	let r2 = record("quota-2", "hash-quota-2", 50, Some(uploader.clone()));
	media.db.create_media(&r1).unwrap();
	media.db.create_media(&r2).unwrap();

	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (150, 2));

	let mxc = Mxc { server_name: &origin(), media_id: "quota-1" };
	media.db.delete_media(&mxc).unwrap();

	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (50, 1));

	assert_eq!(media.db.user_media(&uploader).unwrap().len(), 1);

	// quarantined bytes stop counting; repeating a transition is a no-op
	let row = QuarantineRecord { reason: None, actor: None, at: 3 };
	let mxc2 = Mxc { server_name: &origin(), media_id: "quota-2" };
	media.db.set_quarantine(&mxc2, Some(&row)).unwrap();
	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (0, 0));

	media.db.set_quarantine(&mxc2, Some(&row)).unwrap();
	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (0, 0));

	media.db.set_quarantine(&mxc2, None).unwrap();
	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (50, 1));

	// purging while quarantined must not subtract a second time
	let r3 = record("quota-3", "hash-quota-3", 25, Some(uploader.clone()));
	media.db.create_media(&r3).unwrap();
	let mxc3 = Mxc { server_name: &origin(), media_id: "quota-3" };
	media.db.set_quarantine(&mxc3, Some(&row)).unwrap();
	media.db.delete_media(&mxc3).unwrap();
	let quota = media.db.quota(&uploader).unwrap();
	assert_eq!((quota.bytes, quota.files), (50, 1));
}

#[test]
fn listing_filters_by_uploader_and_content_type() {
	let media = services().media.clone();
	let uploader = user("list-user");

	let mut png = record("list-1", "hash-list-1", 10, Some(uploader.clone()));
	png.content_type = Some("image/png".to_owned());
	let mut pdf = record("list-2", "hash-list-2", 10, Some(uploader.clone()));
	pdf.content_type = Some("application/pdf; charset=binary".to_owned());
	media.db.create_media(&png).unwrap();
	media.db.create_media(&pdf).unwrap();

	let all = media
		.db
		.list_media(None, Some(&uploader), None, None, None)
		.unwrap();
	assert_eq!(all.len(), 2);

	// content types compare on the essence, parameters stripped
	let pdfs = media
		.db
		.list_media(None, Some(&uploader), Some("APPLICATION/PDF"), None, None)
		.unwrap();
	assert_eq!(pdfs.len(), 1);
	assert_eq!(pdfs[0].media_id, "list-2");

	let none = media
		.db
		.list_media(None, Some(&uploader), Some("image/webp"), None, None)
		.unwrap();
	assert!(none.is_empty());
}

#[test]
fn thumbnails_cascade_with_their_source() {
	let media = services().media.clone();

	let r = record("cascade1", "hash-cascade", 64, None);
	media.db.create_media(&r).unwrap();

	let mxc = Mxc { server_name: &origin(), media_id: "cascade1" };
	let dim = Dim { width: 96, height: 96, method: Method::Scale, animated: false };
	let thumbnail = super::ThumbnailRecord {
		origin: origin(),
		media_id: "cascade1".to_owned(),
		dim,
		content_type: "image/png".to_owned(),
		size: 16,
		content_hash: "hash-cascade-thumb".to_owned(),
		created: 2,
	};

	media.db.create_thumbnail(&thumbnail).unwrap();
	assert!(media.db.get_thumbnail(&mxc, &dim).unwrap().is_some());
	assert_eq!(media.db.thumbnails_of(&mxc).unwrap().len(), 1);

	let mut orphaned = media.db.delete_media(&mxc).unwrap();
	orphaned.sort_unstable();
	assert_eq!(
		orphaned,
		vec!["hash-cascade".to_owned(), "hash-cascade-thumb".to_owned()],
	);
	assert!(media.db.get_thumbnail(&mxc, &dim).unwrap().is_none());
}

#[test]
fn memory_cache_is_byte_bounded() {
	let mut cache = ThumbnailMemoryCache::new(100);

	let entry = |n: usize| CachedThumbnail {
		bytes: Arc::new(vec![0_u8; n]),
		content_type: "image/png".to_owned(),
	};

	// larger than capacity/8: never admitted
	cache.insert("huge".to_owned(), entry(64));
	assert!(cache.get("huge").is_none());

	cache.insert("a".to_owned(), entry(10));
	cache.insert("b".to_owned(), entry(10));
	assert!(cache.get("a").is_some());
	assert!(cache.get("b").is_some());

	// filling past the budget evicts the least recently used
	for i in 0..12 {
		cache.insert(format!("fill-{i}"), entry(10));
	}

	assert!(cache.get("a").is_none());

	cache.insert("gone".to_owned(), entry(10));
	cache.invalidate("gone");
	assert!(cache.get("gone").is_none());
}

#[test]
fn sniffing_corrects_generic_declared_types() {
	const PNG_MAGIC: &[u8] = &[
		0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0,
	];

	// declared wins when specific
	assert_eq!(
		effective_content_type(PNG_MAGIC, Some("image/webp")).as_deref(),
		Some("image/webp"),
	);

	// generic declarations are corrected from the bytes
	assert_eq!(
		effective_content_type(PNG_MAGIC, Some("application/octet-stream")).as_deref(),
		Some("image/png"),
	);
	assert_eq!(effective_content_type(PNG_MAGIC, None).as_deref(), Some("image/png"));

	// unidentifiable bytes keep the declaration
	assert_eq!(
		effective_content_type(b"plain text", Some("application/octet-stream")).as_deref(),
		Some("application/octet-stream"),
	);
	assert_eq!(effective_content_type(b"plain text", None), None);
}
