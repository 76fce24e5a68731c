use std::{collections::BTreeMap, sync::Arc};

use vellum_core::Result;

use crate::{Engine, Map};

pub type Maps = BTreeMap<MapsKey, MapsVal>;
pub type MapsKey = &'static str;
pub type MapsVal = Arc<Map>;

/// One column family per record type plus the index families. Keys are
/// `0xFF`-separated segments; values are serialized records unless noted.
pub const MAPS: &[&str] = &[
	// origin / media_id -> MediaRecord
	"mediaid_meta",
	// origin / media_id -> QuarantineRecord
	"mediaid_quarantine",
	// sha256_hex -> FileHashRecord
	"filehash_meta",
	// sha256_hex / origin / media_id -> () ; media reference count
	"filehash_mediaid",
	// sha256_hex / thumbnail key -> () ; thumbnail reference count
	"filehash_thumbnailid",
	// origin / media_id / width / height / method / animated -> ThumbnailRecord
	"thumbnailid_meta",
	// user / origin / media_id -> ()
	"user_mediaid",
	// user -> QuotaRecord
	"user_quota",
	// normalized url / hour bucket -> UrlPreviewRecord
	"url_preview",
];

pub(crate) fn open(engine: &Arc<Engine>) -> Result<Maps> {
	let mut maps = Maps::new();
	for name in MAPS {
		maps.insert(*name, Map::open(engine, name)?);
	}

	Ok(maps)
}
