use std::time::Duration;

use vellum_core::{Result, err};

use super::{Dim, exec, raster, vector, waveform};
use crate::media::{MediaRecord, Service, ingest::effective_content_type};

/// Outcome of one generation. `Passthrough` means the source is already at
/// or below the target size and is served unchanged.
pub(in crate::media) enum Generated {
	Bytes {
		bytes: Vec<u8>,
		content_type: &'static str,
	},
	Passthrough,
}

/// How a capability produces its pixels.
#[derive(Clone, Copy, Debug)]
enum Kind {
	/// Decoded and resized with the raster pipeline, including animation.
	Raster,
	/// Rasterized from vector form under size and complexity caps.
	Vector,
	/// PCM rendered as a waveform.
	Waveform,
	/// Compressed audio decoded to PCM by the external helper, then the
	/// shared waveform stage.
	DecodedWaveform,
	/// First-frame extraction through the external helper.
	Video,
	/// First-page raster through the external helper.
	Pdf,
	/// Still conversion through the external helper.
	Heif,
}

/// A registered generator: the closed enumeration of everything this
/// server can derive thumbnails from. Dispatch is a match over declared
/// content types with a magic-byte fallback.
struct Capability {
	content_types: &'static [&'static str],
	supports_animation: bool,
	kind: Kind,
}

const GENERATORS: &[Capability] = &[
	Capability {
		content_types: &["image/jpeg", "image/jpg"],
		supports_animation: false,
		kind: Kind::Raster,
	},
	Capability {
		content_types: &["image/png"],
		supports_animation: false,
		kind: Kind::Raster,
	},
	Capability {
		content_types: &["image/apng"],
		supports_animation: true,
		kind: Kind::Raster,
	},
	Capability {
		content_types: &["image/gif"],
		supports_animation: true,
		kind: Kind::Raster,
	},
	Capability {
		content_types: &["image/webp"],
		supports_animation: true,
		kind: Kind::Raster,
	},
	Capability {
		content_types: &["image/svg+xml"],
		supports_animation: false,
		kind: Kind::Vector,
	},
	Capability {
		content_types: &["image/heif", "image/heic"],
		supports_animation: false,
		kind: Kind::Heif,
	},
	Capability {
		content_types: &["audio/wav", "audio/wave", "audio/x-wav", "audio/x-pn-wav"],
		supports_animation: false,
		kind: Kind::Waveform,
	},
	Capability {
		content_types: &[
			"audio/mpeg",
			"audio/mp3",
			"audio/ogg",
			"audio/flac",
			"audio/x-flac",
		],
		supports_animation: false,
		kind: Kind::DecodedWaveform,
	},
	Capability {
		content_types: &[
			"video/mp4",
			"video/webm",
			"video/quicktime",
			"video/x-matroska",
			"video/ogg",
		],
		supports_animation: false,
		kind: Kind::Video,
	},
	Capability {
		content_types: &["application/pdf"],
		supports_animation: false,
		kind: Kind::Pdf,
	},
];

fn find(content_type: &str) -> Option<&'static Capability> {
	let content_type = content_type
		.split(';')
		.next()
		.unwrap_or(content_type)
		.trim()
		.to_ascii_lowercase();

	GENERATORS
		.iter()
		.find(|capability| capability.content_types.contains(&content_type.as_str()))
}

/// Declared type first; magic bytes when the declaration names nothing we
/// can derive from.
fn dispatch(content_type: Option<&str>, bytes: &[u8]) -> Option<&'static Capability> {
	if let Some(capability) = content_type.and_then(find) {
		return Some(capability);
	}

	effective_content_type(bytes, None)
		.as_deref()
		.and_then(find)
}

impl Service {
	/// Derive thumbnail bytes from a source. External-helper conversions
	/// run on the I/O runtime; decode and encode stages run on the
	/// thumbnail CPU pool.
	pub(super) async fn generate(
		&self,
		record: &MediaRecord,
		source: Vec<u8>,
		dim: &Dim,
	) -> Result<Generated> {
		let config = &self.services.server.config;

		let Some(capability) = dispatch(record.content_type.as_deref(), &source) else {
			return Err(err!(Request(InvalidParam(
				"Content type {:?} is not supported for thumbnailing",
				record.content_type
			))));
		};

		let dim = Dim {
			animated: dim.animated && capability.supports_animation,
			..*dim
		};

		let helper_timeout = Duration::from_secs(config.thumbnail_helper_timeout);
		let helper_limit = config.thumbnail_helper_output_limit;
		let svg_max = config.thumbnail_svg_max_size;

		match capability.kind {
			| Kind::Raster => {
				self.cpu(move || raster::thumbnail(&source, &dim))
					.await
			},

			| Kind::Vector => {
				self.cpu(move || vector::thumbnail(&source, &dim, svg_max))
					.await
			},

			| Kind::Waveform => {
				self.cpu(move || waveform::thumbnail(&source, &dim))
					.await
			},

			| Kind::DecodedWaveform => {
				let helper = config.thumbnail_audio_decode_helper.clone();
				let wav =
					exec::run(&helper, &source, helper_timeout, helper_limit).await?;
				self.cpu(move || waveform::thumbnail(&wav, &dim))
					.await
			},

			| Kind::Video => {
				let helper = config.thumbnail_video_helper.clone();
				let frame =
					exec::run(&helper, &source, helper_timeout, helper_limit).await?;
				self.cpu(move || raster_intermediate(frame, &dim))
					.await
			},

			| Kind::Pdf => {
				let helper = config.thumbnail_pdf_helper.clone();
				let page =
					exec::run(&helper, &source, helper_timeout, helper_limit).await?;
				self.cpu(move || raster_intermediate(page, &dim))
					.await
			},

			| Kind::Heif => {
				let helper = config.thumbnail_heif_helper.clone();
				let still =
					exec::run(&helper, &source, helper_timeout, helper_limit).await?;
				self.cpu(move || raster_intermediate(still, &dim))
					.await
			},
		}
	}

	/// One CPU-pool slot per request; work is preemptible between stages
	/// because the permit is released when the closure returns.
	async fn cpu<F>(&self, work: F) -> Result<Generated>
	where
		F: FnOnce() -> Result<Generated> + Send + 'static,
	{
		let _permit = self
			.thumbnail_pool
			.acquire()
			.await
			.map_err(|_| err!("thumbnail pool closed"))?;

		tokio::task::spawn_blocking(work).await?
	}
}

/// Helper-derived stills are already the displayable form of their
/// source; when they are at or below the target size they are served
/// as-is rather than falling back to the original container bytes.
fn raster_intermediate(frame: Vec<u8>, dim: &Dim) -> Result<Generated> {
	match raster::thumbnail(&frame, dim)? {
		| Generated::Passthrough =>
			Ok(Generated::Bytes { bytes: frame, content_type: "image/png" }),
		| generated => Ok(generated),
	}
}

