use std::{io::Cursor, path::PathBuf, sync::Arc};

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use vellum_core::{ErrorKind, Mxc, Server, config::Config};
use vellum_database::Database;
use vellum_service::{
	Services,
	media::{ByteStream, Dim, Method},
};

struct TestStack {
	services: Arc<Services>,
	path: PathBuf,
}

impl Drop for TestStack {
	fn drop(&mut self) { std::fs::remove_dir_all(&self.path).ok(); }
}

async fn stack(tag: &str, max_upload_size: usize) -> TestStack {
	let path = std::env::temp_dir().join(format!(
		"vellum-smoke-{tag}-{}-{}",
		std::process::id(),
		vellum_core::utils::random_string(8),
	));

	let config: Config = figment::Figment::new()
		.merge(figment::providers::Serialized::defaults(serde_json::json!({
			"server_name": "smoke.local",
			"database_path": path,
			"max_upload_size": max_upload_size,
			"allow_federation": false,
			"url_preview_enabled": false,
		})))
		.extract()
		.expect("smoke config parses");

	let server = Arc::new(Server::new(config, None));
	let db = Database::open(&server).await.expect("database opens");
	let services = Services::build(server, db).expect("services build");
	services.start().await.expect("services start");

	TestStack { services, path }
}

fn payload_png(width: u32, height: u32) -> Vec<u8> {
	let image = image::DynamicImage::ImageRgba8(image::RgbaImage::from_fn(
		width,
		height,
		|x, y| image::Rgba([(x % 251) as u8, (y % 241) as u8, 99, 255]),
	));

	let mut bytes = Vec::new();
	image
		.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
		.expect("png encodes");
	bytes
}

fn stream_of(bytes: Vec<u8>) -> ByteStream {
	futures::stream::once(futures::future::ready(Ok::<_, vellum_core::Error>(
		Bytes::from(bytes),
	)))
	.boxed()
}

fn uploader() -> ruma::OwnedUserId {
	"@alice:smoke.local".try_into().expect("valid user id")
}

/// Blob files on disk, excluding the temp spool directory.
fn blob_count(root: &std::path::Path) -> usize {
	fn walk(dir: &std::path::Path, count: &mut usize) {
		let Ok(entries) = std::fs::read_dir(dir) else { return };
		for entry in entries.flatten() {
			let path = entry.path();
			if path.is_dir() {
				if path.file_name().is_some_and(|name| name == "tmp") {
					continue;
				}

				walk(&path, count);
			} else {
				*count += 1;
			}
		}
	}

	let mut count = 0;
	walk(&root.join("media"), &mut count);
	count
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_download_thumbnail_quarantine() {
	let stack = stack("pipeline", 20 * 1024 * 1024).await;
	let media = &stack.services.media;
	let user = uploader();

	let payload = payload_png(300, 200);
	let expected_hash = hex::encode(Sha256::digest(&payload));

	let record = media
		.upload(
			Some(&user),
			None,
			Some("image/png"),
			Some("picture.png"),
			Some(payload.len() as u64),
			stream_of(payload.clone()),
		)
		.await
		.expect("upload succeeds");

	assert_eq!(record.origin, "smoke.local");
	assert_eq!(record.size, payload.len() as u64);
	assert_eq!(record.content_hash, expected_hash);

	// round trip: stored bytes hash back to the recorded content hash
	let mxc = Mxc { server_name: &record.origin, media_id: &record.media_id };
	let meta = media
		.get(&mxc)
		.await
		.expect("download succeeds")
		.expect("media present");
	let content = meta.content.expect("entire file contents");
	assert_eq!(content, payload);
	assert_eq!(hex::encode(Sha256::digest(&content)), record.content_hash);

	// identical payload: new identifier, one physical blob
	let record2 = media
		.upload(
			Some(&user),
			None,
			Some("image/png"),
			None,
			Some(payload.len() as u64),
			stream_of(payload.clone()),
		)
		.await
		.expect("re-upload succeeds");
	assert_ne!(record2.media_id, record.media_id);
	assert_eq!(record2.content_hash, record.content_hash);
	assert_eq!(blob_count(&stack.path), 1);

	// thumbnail derivation: smaller, deterministic
	let dim = Dim { width: 96, height: 96, method: Method::Scale, animated: false };
	let thumb = media
		.get_thumbnail(&mxc, &dim)
		.await
		.expect("thumbnail succeeds")
		.expect("thumbnail present");
	let thumb_bytes = thumb.content.expect("thumbnail contents");
	let decoded = image::load_from_memory(&thumb_bytes).expect("thumbnail decodes");
	assert_eq!((decoded.width(), decoded.height()), (96, 64));

	let again = media
		.get_thumbnail(&mxc, &dim)
		.await
		.expect("cached thumbnail succeeds")
		.expect("cached thumbnail present");
	assert_eq!(again.content.expect("cached contents"), thumb_bytes);

	// quarantine denies every channel, reversibly
	media
		.quarantine(&mxc, Some("smoke test".into()), None)
		.await
		.expect("quarantine succeeds");

	let denied = media.get(&mxc).await.expect_err("download denied");
	assert_eq!(denied.kind(), ErrorKind::Quarantined);
	let denied = media
		.get_thumbnail(&mxc, &dim)
		.await
		.expect_err("thumbnail denied");
	assert_eq!(denied.kind(), ErrorKind::Quarantined);

	media.unquarantine(&mxc).await.expect("unquarantine succeeds");
	assert!(media.get(&mxc).await.expect("download allowed").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_respects_the_byte_limit_exactly() {
	let stack = stack("limits", 1024).await;
	let media = &stack.services.media;
	let user = uploader();

	let at_limit = vec![7_u8; 1024];
	media
		.upload(Some(&user), None, Some("application/json"), None, None, stream_of(at_limit))
		.await
		.expect("upload at the limit succeeds");

	let over = vec![7_u8; 1025];
	let denied = media
		.upload(Some(&user), None, Some("application/json"), None, None, stream_of(over))
		.await
		.expect_err("one byte over fails");
	assert_eq!(denied.kind(), ErrorKind::TooLarge);

	// no metadata row and no stray blob for the failed upload
	assert_eq!(
		media
			.list_media(None, None, None, None, None)
			.expect("list")
			.len(),
		1,
	);
	assert_eq!(blob_count(&stack.path), 1);

	let tmp = stack.path.join("media").join("tmp");
	let leftovers = std::fs::read_dir(&tmp)
		.map(|entries| entries.count())
		.unwrap_or(0);
	assert_eq!(leftovers, 0, "failed ingest must clean its temp file");
}

#[tokio::test(flavor = "multi_thread")]
async fn purge_respects_reference_counts() {
	let stack = stack("purge", 20 * 1024 * 1024).await;
	let media = &stack.services.media;
	let user = uploader();

	let payload = payload_png(120, 80);
	let a = media
		.upload(Some(&user), None, Some("image/png"), None, None, stream_of(payload.clone()))
		.await
		.expect("first upload");
	let b = media
		.upload(Some(&user), None, Some("image/png"), None, None, stream_of(payload))
		.await
		.expect("second upload");

	let mxc_a = Mxc { server_name: &a.origin, media_id: &a.media_id };
	let mxc_b = Mxc { server_name: &b.origin, media_id: &b.media_id };

	// derive a thumbnail for `a` so its cascade is exercised too
	let dim = Dim { width: 32, height: 32, method: Method::Crop, animated: false };
	media
		.get_thumbnail(&mxc_a, &dim)
		.await
		.expect("thumbnail succeeds");

	media.purge(&mxc_a).await.expect("purge first");
	assert!(media.get(&mxc_a).await.expect("lookup").is_none());

	// the shared source blob must survive while `b` references it
	assert_eq!(blob_count(&stack.path), 1);

	media.purge(&mxc_b).await.expect("purge second");
	assert_eq!(blob_count(&stack.path), 0, "last referent gone, blob gone");
}
