use ruma::http_headers::{ContentDisposition, ContentDispositionType};

/// Content types safe to render inline in a browser context. Everything
/// else is served as an attachment, as are any types the operator lists in
/// `media_forced_attachment_types`.
const SAFE_INLINE_CONTENT_TYPES: &[&str] = &[
	// keep sorted
	"application/json",
	"application/ld+json",
	"audio/aac",
	"audio/flac",
	"audio/mp4",
	"audio/mpeg",
	"audio/ogg",
	"audio/wav",
	"audio/wave",
	"audio/webm",
	"audio/x-flac",
	"audio/x-pn-wav",
	"audio/x-wav",
	"image/apng",
	"image/avif",
	"image/gif",
	"image/jpeg",
	"image/png",
	"image/webp",
	"text/css",
	"text/csv",
	"text/plain",
	"video/mp4",
	"video/ogg",
	"video/quicktime",
	"video/webm",
];

/// Returns a Content-Disposition of `attachment` or `inline`, depending on
/// the *parsed* content type (parameters stripped, case folded).
#[must_use]
pub fn content_disposition_type(
	content_type: Option<&str>,
	forced_attachment: &[String],
) -> ContentDispositionType {
	let Some(content_type) = content_type else {
		return ContentDispositionType::Attachment;
	};

	let content_type = content_type
		.split(';')
		.next()
		.unwrap_or(content_type)
		.trim()
		.to_ascii_lowercase();

	if forced_attachment
		.iter()
		.any(|forced| forced.eq_ignore_ascii_case(&content_type))
	{
		return ContentDispositionType::Attachment;
	}

	if SAFE_INLINE_CONTENT_TYPES
		.binary_search(&content_type.as_str())
		.is_ok()
	{
		ContentDispositionType::Inline
	} else {
		ContentDispositionType::Attachment
	}
}

/// Constructs the final Content-Disposition for a served object from the
/// stored header, the content type, and a requested filename, in that
/// order of preference for the name.
#[must_use]
pub fn make_content_disposition(
	content_disposition: Option<&ContentDisposition>,
	content_type: Option<&str>,
	forced_attachment: &[String],
	filename: Option<&str>,
) -> ContentDisposition {
	ContentDisposition::new(content_disposition_type(content_type, forced_attachment))
		.with_filename(
			filename
				.or_else(|| {
					content_disposition
						.and_then(|content_disposition| {
							content_disposition.filename.as_deref()
						})
				})
				.map(sanitize)
				.filter(|filename| !filename.is_empty()),
		)
}

/// Strips path separators, control characters, and reserved names so the
/// served filename is harmless on every receiving platform.
#[must_use]
pub fn sanitize(filename: &str) -> String {
	let options = sanitize_filename::Options {
		truncate: true,
		windows: true,
		replacement: "",
	};

	sanitize_filename::sanitize_with_options(filename, options)
}

#[cfg(test)]
mod tests {
	use ruma::http_headers::ContentDispositionType;

	use super::{content_disposition_type, make_content_disposition, sanitize};

	#[test]
	fn safe_types_are_inline() {
		assert_eq!(
			content_disposition_type(Some("image/png"), &[]),
			ContentDispositionType::Inline
		);
		assert_eq!(
			content_disposition_type(Some("IMAGE/PNG; charset=utf-8"), &[]),
			ContentDispositionType::Inline
		);
	}

	#[test]
	fn unsafe_and_unknown_types_are_attachments() {
		assert_eq!(
			content_disposition_type(Some("text/html"), &[]),
			ContentDispositionType::Attachment
		);
		assert_eq!(
			content_disposition_type(Some("image/svg+xml"), &[]),
			ContentDispositionType::Attachment
		);
		assert_eq!(
			content_disposition_type(None, &[]),
			ContentDispositionType::Attachment
		);
	}

	#[test]
	fn forced_types_override_the_allowlist() {
		let forced = vec!["image/png".to_owned()];
		assert_eq!(
			content_disposition_type(Some("image/png"), &forced),
			ContentDispositionType::Attachment
		);
	}

	#[test]
	fn filenames_are_sanitized() {
		assert_eq!(sanitize("../../etc/passwd"), "etcpasswd");
		assert_eq!(sanitize("ok name.png"), "ok name.png");

		let disposition =
			make_content_disposition(None, Some("image/png"), &[], Some("a/b.png"));
		assert_eq!(disposition.filename.as_deref(), Some("ab.png"));
	}
}
