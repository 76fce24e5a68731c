use std::{io::Cursor, net::IpAddr, sync::Arc};

use futures::StreamExt;
use http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use vellum_core::{
	Result, debug_warn, err,
	utils::time::{hour_bucket, now_millis},
};

use super::{IngestRequest, Service};

/// The open-graph object served to clients and cached per (url, hour).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UrlPreviewData {
	#[serde(skip_serializing_if = "Option::is_none", rename = "og:url")]
	pub url: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:site_name")]
	pub site_name: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:type")]
	pub og_type: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:title")]
	pub title: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:description")]
	pub description: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:locale")]
	pub locale: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:image")]
	pub image: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:image:type")]
	pub image_type: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:image:width")]
	pub image_width: Option<u32>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "og:image:height")]
	pub image_height: Option<u32>,

	#[serde(skip_serializing_if = "Option::is_none", rename = "matrix:image:size")]
	pub image_size: Option<u64>,
}

impl Service {
	/// Returns whether the domain-level policy permits previewing the URL.
	/// The address-level denylist is enforced separately at fetch time,
	/// on every redirect hop.
	#[must_use]
	pub fn url_preview_allowed(&self, url: &Url) -> bool {
		let config = &self.services.server.config;
		let Some(host) = url.host_str() else {
			return false;
		};

		let host = host.to_ascii_lowercase();
		if config
			.url_preview_domain_explicit_denylist
			.iter()
			.any(|denied| denied.eq_ignore_ascii_case(&host))
		{
			return false;
		}

		let no_allowlists = config.url_preview_domain_explicit_allowlist.is_empty()
			&& config.url_preview_domain_contains_allowlist.is_empty()
			&& config.url_preview_url_contains_allowlist.is_empty();
		if no_allowlists {
			return true;
		}

		if config
			.url_preview_domain_explicit_allowlist
			.iter()
			.any(|allowed| allowed.eq_ignore_ascii_case(&host))
		{
			return true;
		}

		if config.url_preview_check_root_domain {
			if let Some((_, root)) = host.split_once('.') {
				if config
					.url_preview_domain_explicit_allowlist
					.iter()
					.any(|allowed| allowed.eq_ignore_ascii_case(root))
				{
					return true;
				}
			}
		}

		if config
			.url_preview_domain_contains_allowlist
			.iter()
			.any(|fragment| host.contains(&fragment.to_ascii_lowercase()))
		{
			return true;
		}

		config
			.url_preview_url_contains_allowlist
			.iter()
			.any(|fragment| url.as_str().contains(fragment.as_str()))
	}

	/// Synthesize (or serve from cache) an open-graph preview of the URL.
	/// Cache identity is (normalized url, hour bucket of `ts`).
	#[tracing::instrument(
		name = "url_preview",
		level = "debug",
		skip(self),
		fields(%url),
	)]
	pub async fn get_url_preview(
		self: &Arc<Self>,
		url: &Url,
		ts: Option<u64>,
	) -> Result<UrlPreviewData> {
		let config = &self.services.server.config;
		if !config.url_preview_enabled {
			return Err(err!(Request(Forbidden("URL previews are disabled."))));
		}

		if !matches!(url.scheme(), "http" | "https") {
			return Err(err!(Request(InvalidParam(
				"Only http and https URLs can be previewed"
			))));
		}

		let normalized = normalize_url(url, &config.url_preview_tracking_params);
		let bucket = hour_bucket(ts.unwrap_or_else(now_millis));

		if let Some(cached) = self.db.get_url_preview(normalized.as_str(), bucket)? {
			return Ok(cached);
		}

		let key = (normalized.to_string(), bucket);
		let this = self.clone();
		self.preview_flights
			.run(&key, async move {
				this.request_url_preview(normalized, bucket).await
			})
			.await
	}

	async fn request_url_preview(
		self: Arc<Self>,
		url: Url,
		bucket: u64,
	) -> Result<UrlPreviewData> {
		// a prior flight may have landed while we queued
		if let Some(cached) = self.db.get_url_preview(url.as_str(), bucket)? {
			return Ok(cached);
		}

		self.check_host_allowed(&url).await?;

		let (final_url, response) = self.fetch_with_redirects(url.clone()).await?;
		let content_type = response
			.headers()
			.get(header::CONTENT_TYPE)
			.and_then(|val| val.to_str().ok())
			.map(str::to_ascii_lowercase)
			.unwrap_or_default();

		let cap = self.services.server.config.url_preview_max_spider_size;
		let mut data = if content_type.starts_with("image/") {
			let bytes = read_capped(response, cap).await?;
			let mut data = UrlPreviewData::default();
			self.sideload_image(&mut data, bytes, Some(&content_type), &final_url)
				.await;
			data
		} else if content_type.starts_with("text/html")
			|| content_type.starts_with("application/xhtml+xml")
		{
			let bytes = read_capped(response, cap).await?;
			let mut data = parse_html(&bytes, &final_url)?;
			if let Some(image_url) = data.image.take() {
				self.fetch_and_sideload_image(&mut data, &final_url, &image_url)
					.await;
			}

			data
		} else {
			UrlPreviewData { url: Some(final_url.to_string()), ..Default::default() }
		};

		if data.url.is_none() {
			data.url = Some(final_url.to_string());
		}

		self.db.upsert_url_preview(url.as_str(), bucket, &data)?;
		Ok(data)
	}

	/// Resolve the host and reject it if any address lands in a denylisted
	/// range. IP-literal hosts are checked directly.
	pub(super) async fn check_host_allowed(&self, url: &Url) -> Result {
		let host = url
			.host_str()
			.ok_or_else(|| err!(Request(InvalidParam("URL has no host"))))?;

		if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
			if self.ip_denylisted(ip) {
				return Err(err!(Request(Forbidden(
					"{host} is within a denied address range"
				))));
			}

			return Ok(());
		}

		let resolved = self
			.dns
			.lookup_ip(host)
			.await
			.map_err(|e| err!(Request(NotFound("Failed to resolve {host}: {e}"))))?;

		let mut any = false;
		for ip in resolved.iter() {
			any = true;
			if self.ip_denylisted(ip) {
				return Err(err!(Request(Forbidden(
					"{host} resolves into a denied address range"
				))));
			}
		}

		if !any {
			return Err(err!(Request(NotFound("{host} has no addresses"))));
		}

		Ok(())
	}

	pub(super) fn ip_denylisted(&self, ip: IpAddr) -> bool {
		let Ok(addr) = ipaddress::IPAddress::parse(ip.to_string()) else {
			return true;
		};

		self.denylist
			.iter()
			.any(|range| range.includes(&addr))
	}

	/// Fetch with a capped, manually-followed redirect chain; every hop is
	/// re-validated against the policy and the address denylist.
	async fn fetch_with_redirects(&self, url: Url) -> Result<(Url, reqwest::Response)> {
		let config = &self.services.server.config;
		let cap = config.url_preview_max_spider_size;
		let max_redirects = config.url_preview_max_redirects;

		let mut current = url;
		for _hop in 0..=max_redirects {
			let response = self
				.services
				.client()
				.url_preview
				.get(current.clone())
				.header(header::RANGE, format!("bytes=0-{}", cap.saturating_sub(1)))
				.send()
				.await?;

			let status = response.status();
			if status.is_redirection() {
				let location = response
					.headers()
					.get(header::LOCATION)
					.and_then(|val| val.to_str().ok())
					.ok_or_else(|| {
						err!(BadServerResponse("Redirect without a location"))
					})?;

				let next = current.join(location)?;
				if !matches!(next.scheme(), "http" | "https") {
					return Err(err!(Request(InvalidParam(
						"Redirect to unsupported scheme {:?}",
						next.scheme()
					))));
				}

				if !self.url_preview_allowed(&next) {
					return Err(err!(Request(Forbidden(
						"Redirect target is not allowed to be previewed"
					))));
				}

				self.check_host_allowed(&next).await?;
				debug!(from = %current, to = %next, "Following preview redirect");
				current = next;
				continue;
			}

			if status == StatusCode::NOT_FOUND {
				return Err(err!(Request(NotFound("Document not found"))));
			}

			if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
				return Err(err!(BadServerResponse(
					"Preview fetch failed with {status}"
				)));
			}

			return Ok((current, response));
		}

		Err(err!(Request(InvalidParam("Redirect chain exceeds the configured cap"))))
	}

	async fn fetch_and_sideload_image(
		&self,
		data: &mut UrlPreviewData,
		base: &Url,
		image_url: &str,
	) {
		let Ok(resolved) = base.join(image_url) else {
			debug_warn!(%image_url, "Preview image URL does not resolve");
			return;
		};

		if !matches!(resolved.scheme(), "http" | "https")
			|| !self.url_preview_allowed(&resolved)
		{
			return;
		}

		if let Err(e) = self.check_host_allowed(&resolved).await {
			debug_warn!(%resolved, "Preview image host denied: {e}");
			return;
		}

		let cap = self.services.server.config.url_preview_max_spider_size;
		let response = match self
			.services
			.client()
			.url_preview
			.get(resolved.clone())
			.send()
			.await
		{
			| Ok(response) if response.status().is_success() => response,
			| Ok(response) => {
				debug_warn!(%resolved, status = %response.status(), "Preview image fetch refused");
				return;
			},
			| Err(e) => {
				debug_warn!(%resolved, "Preview image fetch failed: {e}");
				return;
			},
		};

		let content_type = response
			.headers()
			.get(header::CONTENT_TYPE)
			.and_then(|val| val.to_str().ok())
			.map(str::to_owned);

		let bytes = match read_capped(response, cap).await {
			| Ok(bytes) => bytes,
			| Err(e) => {
				debug_warn!(%resolved, "Preview image body rejected: {e}");
				return;
			},
		};

		self.sideload_image(data, bytes, content_type.as_deref(), &resolved)
			.await;
	}

	/// Ingest preview image bytes as local media and reference them from
	/// the preview. A failure here never fails the preview; the text
	/// fields cache with a null image.
	async fn sideload_image(
		&self,
		data: &mut UrlPreviewData,
		bytes: Vec<u8>,
		content_type: Option<&str>,
		source_url: &Url,
	) {
		let dimensions = image::ImageReader::new(Cursor::new(&bytes))
			.with_guessed_format()
			.ok()
			.and_then(|reader| reader.into_dimensions().ok());

		let filename = source_url
			.path_segments()
			.and_then(|mut segments| segments.next_back())
			.filter(|segment| !segment.is_empty())
			.map(str::to_owned);

		let size = bytes.len() as u64;
		let request = IngestRequest {
			origin: self.services.globals().server_name().to_owned(),
			media_id: None,
			uploader: None,
			content_type: content_type.map(str::to_owned),
			filename,
			declared_len: Some(size),
		};

		let stream = futures::stream::once(futures::future::ready(Ok(
			bytes::Bytes::from(bytes),
		)))
		.boxed();

		match self.ingest(request, stream).await {
			| Ok(record) => {
				data.image =
					Some(format!("mxc://{}/{}", record.origin, record.media_id));
				data.image_size = Some(record.size);
				data.image_type = record.content_type;
				if let Some((width, height)) = dimensions {
					data.image_width = Some(width);
					data.image_height = Some(height);
				}
			},
			| Err(e) => {
				debug_warn!(%source_url, "Preview image sideload failed: {e}");
			},
		}
	}
}

/// Canonical form a URL caches under: no fragment, tracking parameters
/// dropped, remaining query sorted. The parser already lowercases the
/// host and strips default ports.
pub(super) fn normalize_url(url: &Url, tracking_params: &[String]) -> Url {
	let mut normalized = url.clone();
	normalized.set_fragment(None);

	let mut pairs: Vec<(String, String)> = url
		.query_pairs()
		.filter(|(key, _)| !tracking_params.iter().any(|param| param == key))
		.map(|(key, val)| (key.into_owned(), val.into_owned()))
		.collect();

	pairs.sort();

	if pairs.is_empty() {
		normalized.set_query(None);
	} else {
		normalized
			.query_pairs_mut()
			.clear()
			.extend_pairs(pairs);
	}

	normalized
}

fn parse_html(bytes: &[u8], final_url: &Url) -> Result<UrlPreviewData> {
	let html = String::from_utf8_lossy(bytes).into_owned();
	let page = webpage::HTML::from_string(html, Some(final_url.to_string()))
		.map_err(|e| err!(BadServerResponse("Failed to parse preview document: {e}")))?;

	let property = |name: &str| page.opengraph.properties.get(name).cloned();
	let url = property("url").or_else(|| Some(final_url.to_string()));
	let site_name = property("site_name");
	let og_type =
		(!page.opengraph.og_type.is_empty()).then(|| page.opengraph.og_type.clone());
	let title = property("title");
	let description = property("description");
	let locale = property("locale");
	let image = page
		.opengraph
		.images
		.first()
		.map(|image| image.url.clone());

	Ok(UrlPreviewData {
		url,
		site_name,
		og_type,
		title: title.or(page.title),
		description: description.or(page.description),
		locale: locale.or(page.language),
		image,
		..Default::default()
	})
}

async fn read_capped(response: reqwest::Response, cap: usize) -> Result<Vec<u8>> {
	let mut body = Vec::new();
	let mut stream = response.bytes_stream();
	while let Some(chunk) = stream.next().await {
		let chunk = chunk?;
		if body.len().saturating_add(chunk.len()) > cap {
			return Err(err!(Request(TooLarge(
				"Document exceeds the {cap} byte preview cap"
			))));
		}

		body.extend_from_slice(&chunk);
	}

	Ok(body)
}

#[cfg(test)]
mod tests {
	use url::Url;

	use super::{normalize_url, parse_html};

	fn tracking() -> Vec<String> {
		["utm_source", "utm_medium", "fbclid"]
			.map(str::to_owned)
			.to_vec()
	}

	#[test]
	fn normalization_strips_tracking_and_sorts() {
		let url =
			Url::parse("HTTP://Example.COM:80/a?z=1&utm_source=mail&a=2#frag").unwrap();
		let normalized = normalize_url(&url, &tracking());
		assert_eq!(normalized.as_str(), "http://example.com/a?a=2&z=1");
	}

	#[test]
	fn normalization_without_query_is_clean() {
		let url = Url::parse("https://example.com/page?utm_source=x").unwrap();
		let normalized = normalize_url(&url, &tracking());
		assert_eq!(normalized.as_str(), "https://example.com/page");
	}

	#[test]
	fn html_extraction_prefers_open_graph() {
		let html = br#"<html><head>
			<title>Fallback Title</title>
			<meta name="description" content="Fallback description">
			<meta property="og:title" content="OG Title">
			<meta property="og:site_name" content="Example">
			<meta property="og:image" content="/logo.png">
			</head><body></body></html>"#;

		let url = Url::parse("https://example.com/article").unwrap();
		let data = parse_html(html, &url).unwrap();

		assert_eq!(data.title.as_deref(), Some("OG Title"));
		assert_eq!(data.site_name.as_deref(), Some("Example"));
		assert!(data.image.as_deref().is_some_and(|img| img.contains("logo.png")));
		assert_eq!(data.description.as_deref(), Some("Fallback description"));
	}

	#[test]
	fn html_extraction_falls_back_to_title_tag() {
		let html = b"<html><head><title>Just a Title</title></head><body></body></html>";
		let url = Url::parse("https://example.com/").unwrap();
		let data = parse_html(html, &url).unwrap();

		assert_eq!(data.title.as_deref(), Some("Just a Title"));
		assert_eq!(data.url.as_deref(), Some("https://example.com/"));
	}
}
