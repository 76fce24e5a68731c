use ruma::ServerName;
use vellum_core::{
	Err, Mxc, Result,
	utils::content_disposition::make_content_disposition,
};
use vellum_service::media::{Dim, FileMeta};

/// Load media locally, falling back to a federation fetch for remote
/// identifiers when permitted.
pub(crate) async fn get_file(
	services: &crate::State,
	server_name: &ServerName,
	media_id: &str,
	filename: Option<&str>,
	allow_remote: bool,
) -> Result<FileMeta> {
	let mxc = Mxc { server_name, media_id };

	if let Some(meta) = services.media.get(&mxc).await? {
		return Ok(with_filename(services, meta, filename));
	}

	if !services.globals.server_is_ours(server_name) && allow_remote {
		let meta = services.media.fetch_remote_content(&mxc).await?;
		return Ok(with_filename(services, (*meta).clone(), filename));
	}

	Err!(Request(NotFound("Media not found.")))
}

/// Load or derive a thumbnail, materializing remote sources first when
/// permitted.
pub(crate) async fn get_thumbnail(
	services: &crate::State,
	server_name: &ServerName,
	media_id: &str,
	dim: &Dim,
	allow_remote: bool,
) -> Result<FileMeta> {
	let mxc = Mxc { server_name, media_id };

	if let Some(meta) = services.media.get_thumbnail(&mxc, dim).await? {
		return Ok(meta);
	}

	if !services.globals.server_is_ours(server_name) && allow_remote {
		services.media.fetch_remote_content(&mxc).await?;
		if let Some(meta) = services.media.get_thumbnail(&mxc, dim).await? {
			return Ok(meta);
		}
	}

	Err!(Request(NotFound("Media not found.")))
}

/// Replace the served filename while keeping the disposition policy.
fn with_filename(
	services: &crate::State,
	meta: FileMeta,
	filename: Option<&str>,
) -> FileMeta {
	let Some(filename) = filename else {
		return meta;
	};

	let content_disposition = make_content_disposition(
		meta.content_disposition.as_ref(),
		meta.content_type.as_deref(),
		&services.server.config.media_forced_attachment_types,
		Some(filename),
	);

	FileMeta {
		content_disposition: Some(content_disposition),
		..meta
	}
}
