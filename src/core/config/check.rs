use crate::{Config, Err, Result, config::MediaStorageConfig, err};

/// Validates the parsed configuration for internal consistency. Called once
/// at startup after load; a failure here aborts before anything opens.
pub fn check(config: &Config) -> Result {
	if config.max_upload_size == 0 {
		return Err!(Config("max_upload_size", "must be nonzero"));
	}

	if config.media_id_length < 16 || config.media_id_length > 255 {
		return Err!(Config("media_id_length", "must be between 16 and 255"));
	}

	if config.thumbnail_sizes.is_empty() {
		return Err!(Config("thumbnail_sizes", "at least one dimension pair is required"));
	}

	if config
		.thumbnail_sizes
		.iter()
		.any(|size| size.width == 0 || size.height == 0)
	{
		return Err!(Config("thumbnail_sizes", "dimensions must be nonzero"));
	}

	if config.thumbnail_parallelism == 0 {
		return Err!(Config("thumbnail_parallelism", "must be nonzero"));
	}

	for cidr in &config.ip_range_denylist {
		ipaddress::IPAddress::parse(cidr)
			.map_err(|e| err!(Config("ip_range_denylist", "Invalid CIDR {cidr:?}: {e}")))?;
	}

	for (name, helper) in [
		("thumbnail_video_helper", &config.thumbnail_video_helper),
		("thumbnail_pdf_helper", &config.thumbnail_pdf_helper),
		("thumbnail_heif_helper", &config.thumbnail_heif_helper),
		("thumbnail_audio_decode_helper", &config.thumbnail_audio_decode_helper),
	] {
		if !helper.is_empty() && !helper.iter().any(|arg| arg.contains("{input}")) {
			return Err(err!(Config(
				"thumbnail_helpers",
				"{name} must reference {{input}} somewhere in its argv"
			)));
		}
	}

	for policy in [
		config.rate_limits.download,
		config.rate_limits.upload,
		config.rate_limits.thumbnail,
		config.rate_limits.preview,
	] {
		if policy.window_ms == 0 || policy.limit == 0 {
			return Err!(Config("rate_limits", "limit and window_ms must be nonzero"));
		}
	}

	if let MediaStorageConfig::S3(s3) = &config.media_storage {
		if s3.bucket.is_empty() || s3.region.is_empty() {
			return Err!(Config("media_storage", "S3 backend requires bucket and region"));
		}

		if s3.key.is_empty() || s3.secret.is_empty() {
			return Err!(Config("media_storage", "S3 backend requires credentials"));
		}
	}

	if config.allow_federation
		&& config.federation_concurrency_per_origin == 0
	{
		return Err!(Config("federation_concurrency_per_origin", "must be nonzero"));
	}

	Ok(())
}
