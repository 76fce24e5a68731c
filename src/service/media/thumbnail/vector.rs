use resvg::{tiny_skia, usvg};
use vellum_core::{Result, err};

use super::{Dim, Generated, Method};

/// Hard ceiling on rasterized pixels regardless of the requested size.
const MAX_PIXELS: u64 = 4096 * 4096;

/// Rasterize an SVG document to the requested dimensions. Vector sources
/// scale losslessly, so rendering happens directly at the target size
/// rather than through the raster resize path.
pub(super) fn thumbnail(source: &[u8], dim: &Dim, max_bytes: usize) -> Result<Generated> {
	if source.len() > max_bytes {
		return Err(err!(Request(TooLarge(
			"SVG document of {} bytes exceeds the {max_bytes} byte rasterization cap",
			source.len(),
		))));
	}

	let options = usvg::Options::default();
	let tree = usvg::Tree::from_data(source, &options)
		.map_err(|e| err!(Request(InvalidParam("SVG parse failed: {e}"))))?;

	let size = tree.size();
	let (source_width, source_height) = (size.width(), size.height());
	if source_width <= 0.0 || source_height <= 0.0 {
		return Err(err!(Request(InvalidParam("SVG document has no intrinsic size"))));
	}

	let scale_x = f64::from(dim.width) / f64::from(source_width);
	let scale_y = f64::from(dim.height) / f64::from(source_height);
	let scale = match dim.method {
		| Method::Scale => scale_x.min(scale_y),
		| Method::Crop => scale_x.max(scale_y),
	};

	let (out_width, out_height) = match dim.method {
		| Method::Scale => (
			((f64::from(source_width) * scale).round() as u32).max(1),
			((f64::from(source_height) * scale).round() as u32).max(1),
		),
		| Method::Crop => (dim.width, dim.height),
	};

	if u64::from(out_width).saturating_mul(u64::from(out_height)) > MAX_PIXELS {
		return Err(err!(Request(TooLarge("Rasterization target is too large"))));
	}

	let mut pixmap = tiny_skia::Pixmap::new(out_width, out_height)
		.ok_or_else(|| err!(Request(InvalidParam("Rasterization target is empty"))))?;

	// center the overflow when cropping
	let translate_x = (f64::from(out_width) - f64::from(source_width) * scale) / 2.0;
	let translate_y = (f64::from(out_height) - f64::from(source_height) * scale) / 2.0;

	let transform = tiny_skia::Transform::from_translate(
		translate_x as f32,
		translate_y as f32,
	)
	.pre_scale(scale as f32, scale as f32);

	resvg::render(&tree, transform, &mut pixmap.as_mut());

	let bytes = pixmap
		.encode_png()
		.map_err(|e| err!("PNG encode of rasterized SVG failed: {e}"))?;

	Ok(Generated::Bytes { bytes, content_type: "image/png" })
}

#[cfg(test)]
mod tests {
	use super::{Generated, thumbnail};
	use crate::media::thumbnail::{Dim, Method};

	const SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="100">
		<rect width="200" height="100" fill="#336699"/>
	</svg>"##;

	#[test]
	fn rasterizes_at_scaled_dimensions() {
		let dim = Dim { width: 96, height: 96, method: Method::Scale, animated: false };
		let Generated::Bytes { bytes, content_type } =
			thumbnail(SVG.as_bytes(), &dim, 1024 * 1024).unwrap()
		else {
			panic!("expected generated bytes");
		};

		assert_eq!(content_type, "image/png");
		let image = image::load_from_memory(&bytes).unwrap();
		assert_eq!((image.width(), image.height()), (96, 48));
	}

	#[test]
	fn oversized_documents_are_rejected() {
		let dim = Dim { width: 96, height: 96, method: Method::Scale, animated: false };
		assert!(thumbnail(SVG.as_bytes(), &dim, 16).is_err());
	}
}
