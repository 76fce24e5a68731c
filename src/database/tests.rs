use std::{path::PathBuf, sync::Arc};

use vellum_core::{Server, config::Config};

use crate::Database;

struct TempDb {
	db: Arc<Database>,
	path: PathBuf,
}

impl Drop for TempDb {
	fn drop(&mut self) { std::fs::remove_dir_all(&self.path).ok(); }
}

async fn open_temp(tag: &str) -> TempDb {
	let path = std::env::temp_dir().join(format!(
		"vellum-db-test-{tag}-{}-{}",
		std::process::id(),
		vellum_core::utils::random_string(8),
	));

	let config: Config = figment::Figment::new()
		.merge(figment::providers::Serialized::defaults(
			serde_json::json!({
				"server_name": "test.local",
				"database_path": path,
			}),
		))
		.extract()
		.expect("test config");

	let server = Arc::new(Server::new(config, None));
	let db = Database::open(&server).await.expect("database opens");

	TempDb { db, path }
}

#[tokio::test]
async fn round_trip_and_prefix_scan() {
	let tmp = open_temp("roundtrip").await;
	let map = &tmp.db["mediaid_meta"];

	map.insert(b"a\xFF1", b"one").unwrap();
	map.insert(b"a\xFF2", b"two").unwrap();
	map.insert(b"b\xFF1", b"other").unwrap();

	assert_eq!(map.get(b"a\xFF1").unwrap().as_deref(), Some(&b"one"[..]));
	assert!(map.get(b"missing").unwrap().is_none());

	let scanned = map.scan_prefix(b"a\xFF").unwrap();
	assert_eq!(scanned.len(), 2);
	assert_eq!(map.count_prefix(b"a\xFF").unwrap(), 2);

	map.remove(b"a\xFF1").unwrap();
	assert!(!map.contains(b"a\xFF1").unwrap());
	assert_eq!(map.count_prefix(b"a\xFF").unwrap(), 1);
}

#[tokio::test]
async fn batch_writes_are_atomic_across_columns() {
	let tmp = open_temp("batch").await;

	let mut batch = tmp.db.batch();
	batch.insert(&tmp.db["mediaid_meta"], b"k", b"v");
	batch.insert(&tmp.db["filehash_mediaid"], b"h\xFFk", b"");
	batch.remove(&tmp.db["mediaid_meta"], b"never-existed");
	batch.commit().unwrap();

	assert!(tmp.db["mediaid_meta"].contains(b"k").unwrap());
	assert!(tmp.db["filehash_mediaid"].contains(b"h\xFFk").unwrap());
}

#[test]
fn segments_join_with_separator() {
	let key = crate::segments([&b"origin"[..], &b"media"[..], &b"42"[..]]);
	assert_eq!(key, b"origin\xFFmedia\xFF42".to_vec());

	let single = crate::segments([&b"only"[..]]);
	assert_eq!(single, b"only".to_vec());
}
