use std::io::Cursor;

use image::{
	AnimationDecoder, DynamicImage, Frame, ImageFormat, imageops::FilterType,
	codecs::{gif::GifDecoder, png::PngDecoder, webp::WebPDecoder},
};
use vellum_core::{Result, err};

use super::{Dim, Generated, Method};

/// Frames decoded from an animated source before we stop; bounds the work
/// an adversarial file can demand.
const FRAME_LIMIT: usize = 120;

/// Deterministic JPEG quality so repeated derivations are byte-identical.
const JPEG_QUALITY: u8 = 82;

const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

pub(super) fn thumbnail(source: &[u8], dim: &Dim) -> Result<Generated> {
	let format = image::guess_format(source)?;

	if dim.animated {
		if let Some(frames) = animation_frames(source, format)? {
			return animated_thumbnail(&frames, dim);
		}
	}

	still_thumbnail(source, format, dim)
}

fn still_thumbnail(source: &[u8], format: ImageFormat, dim: &Dim) -> Result<Generated> {
	let image = image::load_from_memory_with_format(source, format)?;

	if !fits(&image, dim) {
		// upscaling is refused; the caller serves the source as-is
		return Ok(Generated::Passthrough);
	}

	let thumbnail = resize(&image, dim);
	encode(&thumbnail, format)
}

fn fits(image: &DynamicImage, dim: &Dim) -> bool {
	let source = u64::from(image.width()).saturating_mul(u64::from(image.height()));
	let target = u64::from(dim.width).saturating_mul(u64::from(dim.height));

	target < source
}

fn resize(image: &DynamicImage, dim: &Dim) -> DynamicImage {
	match dim.method {
		| Method::Crop => image.resize_to_fill(dim.width, dim.height, RESIZE_FILTER),
		| Method::Scale => image.resize(dim.width, dim.height, RESIZE_FILTER),
	}
}

fn encode(image: &DynamicImage, source_format: ImageFormat) -> Result<Generated> {
	let mut bytes = Vec::new();

	if source_format == ImageFormat::Jpeg {
		let rgb = image.to_rgb8();
		let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
			&mut Cursor::new(&mut bytes),
			JPEG_QUALITY,
		);
		rgb.write_with_encoder(encoder)?;

		return Ok(Generated::Bytes { bytes, content_type: "image/jpeg" });
	}

	image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
	Ok(Generated::Bytes { bytes, content_type: "image/png" })
}

/// Frames of an animated source, or None when the source holds fewer than
/// two frames and a still should be derived instead.
fn animation_frames(source: &[u8], format: ImageFormat) -> Result<Option<Vec<Frame>>> {
	let frames = match format {
		| ImageFormat::Gif => GifDecoder::new(Cursor::new(source))?
			.into_frames()
			.take(FRAME_LIMIT)
			.collect::<image::ImageResult<Vec<_>>>()?,

		| ImageFormat::WebP => {
			let decoder = WebPDecoder::new(Cursor::new(source))?;
			if !decoder.has_animation() {
				return Ok(None);
			}

			decoder
				.into_frames()
				.take(FRAME_LIMIT)
				.collect::<image::ImageResult<Vec<_>>>()?
		},

		| ImageFormat::Png => {
			let decoder = PngDecoder::new(Cursor::new(source))?;
			if !decoder.is_apng()? {
				return Ok(None);
			}

			decoder
				.apng()?
				.into_frames()
				.take(FRAME_LIMIT)
				.collect::<image::ImageResult<Vec<_>>>()?
		},

		| _ => return Ok(None),
	};

	if frames.len() < 2 {
		return Ok(None);
	}

	Ok(Some(frames))
}

/// Resize every frame and re-encode as an animated GIF with the source
/// delays preserved.
fn animated_thumbnail(frames: &[Frame], dim: &Dim) -> Result<Generated> {
	use image::codecs::gif::{GifEncoder, Repeat};

	let first = frames
		.first()
		.ok_or_else(|| err!("animated source with no frames"))?;

	let (source_width, source_height) = first.buffer().dimensions();
	let source =
		u64::from(source_width).saturating_mul(u64::from(source_height));
	let target = u64::from(dim.width).saturating_mul(u64::from(dim.height));
	if target >= source {
		return Ok(Generated::Passthrough);
	}

	let (out_width, out_height) = dim.output_size(source_width, source_height);

	let mut scaled = Vec::with_capacity(frames.len());
	for frame in frames {
		let buffer = DynamicImage::ImageRgba8(frame.buffer().clone());
		let resized = match dim.method {
			| Method::Crop =>
				buffer.resize_to_fill(out_width, out_height, RESIZE_FILTER),
			| Method::Scale => buffer.resize(out_width, out_height, RESIZE_FILTER),
		};

		scaled.push(Frame::from_parts(resized.into_rgba8(), 0, 0, frame.delay()));
	}

	let mut bytes = Vec::new();
	{
		let mut encoder = GifEncoder::new(&mut bytes);
		encoder.set_repeat(Repeat::Infinite)?;
		encoder.encode_frames(scaled)?;
	}

	Ok(Generated::Bytes { bytes, content_type: "image/gif" })
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use image::{DynamicImage, ImageFormat, RgbaImage};

	use super::{Generated, thumbnail};
	use crate::media::thumbnail::{Dim, Method};

	fn png(width: u32, height: u32) -> Vec<u8> {
		let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
			image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
		}));

		let mut bytes = Vec::new();
		image
			.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
			.expect("png encodes");
		bytes
	}

	fn dim(width: u32, height: u32, method: Method) -> Dim {
		Dim { width, height, method, animated: false }
	}

	#[test]
	fn scale_preserves_aspect_ratio() {
		let source = png(200, 100);
		let Generated::Bytes { bytes, content_type } =
			thumbnail(&source, &dim(96, 96, Method::Scale)).unwrap()
		else {
			panic!("expected generated bytes");
		};

		assert_eq!(content_type, "image/png");
		let out = image::load_from_memory(&bytes).unwrap();
		assert_eq!((out.width(), out.height()), (96, 48));
	}

	#[test]
	fn crop_fills_the_requested_box() {
		let source = png(200, 100);
		let Generated::Bytes { bytes, .. } =
			thumbnail(&source, &dim(96, 96, Method::Crop)).unwrap()
		else {
			panic!("expected generated bytes");
		};

		let out = image::load_from_memory(&bytes).unwrap();
		assert_eq!((out.width(), out.height()), (96, 96));
	}

	#[test]
	fn small_sources_pass_through_unscaled() {
		let source = png(16, 16);
		assert!(matches!(
			thumbnail(&source, &dim(96, 96, Method::Scale)).unwrap(),
			Generated::Passthrough
		));
	}

	#[test]
	fn derivation_is_deterministic() {
		let source = png(300, 200);
		let a = thumbnail(&source, &dim(96, 96, Method::Scale)).unwrap();
		let b = thumbnail(&source, &dim(96, 96, Method::Scale)).unwrap();

		match (a, b) {
			| (
				Generated::Bytes { bytes: a, .. },
				Generated::Bytes { bytes: b, .. },
			) => assert_eq!(a, b),
			| _ => panic!("expected generated bytes"),
		}
	}
}
