mod check;

use std::{
	collections::BTreeMap,
	net::{IpAddr, Ipv4Addr},
	path::{Path, PathBuf},
};

use figment::{
	Figment,
	providers::{Env, Format, Toml},
};
use ruma::{OwnedServerName, OwnedUserId};
use serde::{Deserialize, Serialize};
use url::Url;

pub use self::check::check;
use crate::{Result, err};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "VELLUM_";

/// All configuration is loaded once at startup and treated as an immutable
/// snapshot threaded through the request context.
#[derive(Clone, Debug, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
	/// Name of this server, as it appears in the origin part of the content
	/// identifiers it mints.
	pub server_name: OwnedServerName,

	#[serde(default = "default_address")]
	pub address: IpAddr,

	#[serde(default = "default_port")]
	pub port: u16,

	#[serde(default = "default_database_path")]
	pub database_path: PathBuf,

	#[serde(default = "default_log")]
	pub log: String,

	#[serde(default = "true_fn")]
	pub log_colors: bool,

	#[serde(default)]
	pub log_thread_ids: bool,

	#[serde(default)]
	pub worker_threads: Option<usize>,

	#[serde(default = "default_client_shutdown_timeout")]
	pub client_shutdown_timeout: u64,

	#[serde(default = "default_request_timeout")]
	pub request_timeout: u64,

	#[serde(default = "default_rocksdb_max_open_files")]
	pub rocksdb_max_open_files: i32,

	//
	// Media
	//
	/// Hard cap in bytes on uploaded payloads; one byte over fails.
	#[serde(default = "default_max_upload_size")]
	pub max_upload_size: usize,

	/// Length of generated media identifiers.
	#[serde(default = "default_media_id_length")]
	pub media_id_length: usize,

	/// When two uploads carry identical bytes only one physical copy is
	/// kept; this knob controls whether each upload still receives its own
	/// identifier (the default) rather than the existing one.
	#[serde(default = "true_fn")]
	pub media_unique_ids_per_upload: bool,

	#[serde(default)]
	pub media_storage: MediaStorageConfig,

	/// Content types always served as `attachment` regardless of the safe
	/// inline allowlist.
	#[serde(default = "default_forced_attachment_types")]
	pub media_forced_attachment_types: Vec<String>,

	//
	// Thumbnails
	//
	/// Discrete dimension pairs a thumbnail request is clamped onto.
	#[serde(default = "default_thumbnail_sizes")]
	pub thumbnail_sizes: Vec<ThumbnailSize>,

	/// Concurrent thumbnail generations; this bounds the CPU pool.
	#[serde(default = "default_thumbnail_parallelism")]
	pub thumbnail_parallelism: usize,

	/// Byte budget of the in-memory thumbnail cache tier.
	#[serde(default = "default_thumbnail_cache_capacity")]
	pub thumbnail_cache_capacity: usize,

	/// Seconds an external helper may run before it is killed.
	#[serde(default = "default_helper_timeout")]
	pub thumbnail_helper_timeout: u64,

	/// Byte cap on helper output.
	#[serde(default = "default_helper_output_limit")]
	pub thumbnail_helper_output_limit: usize,

	/// First-frame extraction command for video sources. `{input}` is
	/// replaced with a temp file path; output is read from stdout unless
	/// `{output}` appears in the argv.
	#[serde(default = "default_video_helper")]
	pub thumbnail_video_helper: Vec<String>,

	/// First-page raster command for PDF sources.
	#[serde(default = "default_pdf_helper")]
	pub thumbnail_pdf_helper: Vec<String>,

	/// Still conversion command for HEIF/HEIC sources.
	#[serde(default = "default_heif_helper")]
	pub thumbnail_heif_helper: Vec<String>,

	/// PCM decode command for compressed audio, producing WAV on stdout for
	/// the shared waveform stage.
	#[serde(default = "default_audio_decode_helper")]
	pub thumbnail_audio_decode_helper: Vec<String>,

	/// Byte cap on SVG documents accepted for rasterization.
	#[serde(default = "default_svg_max_size")]
	pub thumbnail_svg_max_size: usize,

	//
	// URL previews
	//
	#[serde(default = "true_fn")]
	pub url_preview_enabled: bool,

	#[serde(default)]
	pub url_preview_domain_contains_allowlist: Vec<String>,

	#[serde(default)]
	pub url_preview_domain_explicit_allowlist: Vec<String>,

	#[serde(default)]
	pub url_preview_domain_explicit_denylist: Vec<String>,

	#[serde(default)]
	pub url_preview_url_contains_allowlist: Vec<String>,

	#[serde(default = "default_url_preview_max_spider_size")]
	pub url_preview_max_spider_size: usize,

	#[serde(default)]
	pub url_preview_check_root_domain: bool,

	#[serde(default = "default_url_preview_max_redirects")]
	pub url_preview_max_redirects: usize,

	/// Query parameters stripped during URL normalization.
	#[serde(default = "default_url_preview_tracking_params")]
	pub url_preview_tracking_params: Vec<String>,

	/// CIDR ranges remote hosts may never resolve into; applies to URL
	/// previews and their redirect chains.
	#[serde(default = "default_ip_range_denylist")]
	pub ip_range_denylist: Vec<String>,

	//
	// Federation
	//
	#[serde(default = "true_fn")]
	pub allow_federation: bool,

	/// Explicit peer base URLs, consulted before discovery.
	#[serde(default)]
	pub federation_peers: BTreeMap<OwnedServerName, Url>,

	/// Outgoing bearer secrets per peer.
	#[serde(default)]
	pub federation_secrets: BTreeMap<OwnedServerName, String>,

	/// Incoming shared secret peers must present.
	#[serde(default)]
	pub federation_shared_secret: Option<String>,

	/// When non-empty, only these peers may be fetched from.
	#[serde(default)]
	pub trusted_servers: Vec<OwnedServerName>,

	#[serde(default = "true_fn")]
	pub federation_discovery: bool,

	/// Total deadline in seconds for one remote fetch.
	#[serde(default = "default_federation_timeout")]
	pub federation_timeout: u64,

	#[serde(default = "default_federation_concurrency")]
	pub federation_concurrency_per_origin: usize,

	/// Seconds a remote not-found marker shields the origin from retries.
	#[serde(default = "default_federation_negative_ttl")]
	pub federation_negative_cache_ttl: u64,

	//
	// Limits
	//
	#[serde(default)]
	pub rate_limits: RateLimitsConfig,

	/// Per-user cap on stored bytes across non-quarantined media; unset
	/// disables the quota.
	#[serde(default)]
	pub user_quota_bytes: Option<u64>,

	/// Per-user cap on number of stored uploads.
	#[serde(default)]
	pub user_quota_files: Option<u64>,

	//
	// Identity adapter
	//
	/// Static access tokens mapped to user ids. Stands in for the identity
	/// server validation path, which is an external collaborator.
	#[serde(default)]
	pub access_tokens: BTreeMap<String, OwnedUserId>,

	/// Tokens permitted on the admin surface.
	#[serde(default)]
	pub admin_tokens: Vec<String>,

	#[serde(default = "true_fn")]
	pub allow_unauthenticated_downloads: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum MediaStorageConfig {
	Filesystem {
		/// Blob tree root; defaults to `<database_path>/media`.
		#[serde(default)]
		path: Option<PathBuf>,

		#[serde(default)]
		directory_structure: DirectoryStructure,
	},
	S3(S3StorageConfig),
}

impl Default for MediaStorageConfig {
	fn default() -> Self {
		Self::Filesystem {
			path: None,
			directory_structure: DirectoryStructure::default(),
		}
	}
}

/// How hash-named files shard into subdirectories: `depth` levels of
/// `length`-character prefixes, e.g. depth 2 / length 2 stores
/// `abcdef…` at `ab/cd/abcdef…`.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct DirectoryStructure {
	#[serde(default = "default_directory_depth")]
	pub depth: u8,

	#[serde(default = "default_directory_length")]
	pub length: u8,
}

impl Default for DirectoryStructure {
	fn default() -> Self {
		Self {
			depth: default_directory_depth(),
			length: default_directory_length(),
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3StorageConfig {
	pub endpoint: Url,
	pub bucket: String,
	pub region: String,
	pub key: String,
	pub secret: String,

	/// Key prefix within the bucket.
	#[serde(default)]
	pub path: Option<String>,

	#[serde(default = "true_fn")]
	pub path_style: bool,

	#[serde(default = "default_s3_request_duration")]
	pub request_duration: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ThumbnailSize {
	pub width: u32,
	pub height: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RatePolicy {
	/// Requests admitted per window.
	pub limit: u32,

	pub window_ms: u64,

	/// Extra requests admitted in a burst above the steady rate.
	#[serde(default)]
	pub burst: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RateLimitsConfig {
	#[serde(default = "default_download_rate")]
	pub download: RatePolicy,

	#[serde(default = "default_upload_rate")]
	pub upload: RatePolicy,

	#[serde(default = "default_thumbnail_rate")]
	pub thumbnail: RatePolicy,

	#[serde(default = "default_preview_rate")]
	pub preview: RatePolicy,
}

impl Default for RateLimitsConfig {
	fn default() -> Self {
		Self {
			download: default_download_rate(),
			upload: default_upload_rate(),
			thumbnail: default_thumbnail_rate(),
			preview: default_preview_rate(),
		}
	}
}

impl Config {
	/// Load and parse the configuration from TOML file(s) merged with
	/// `VELLUM_*` environment variables.
	pub fn load<'a, I>(paths: I) -> Result<Self>
	where
		I: Iterator<Item = &'a Path>,
	{
		let mut figment = Figment::new();
		for path in paths {
			figment = figment.merge(Toml::file(path));
		}

		let config: Self = figment
			.merge(Env::prefixed(ENV_PREFIX).split("__"))
			.extract()
			.map_err(|e| err!(Config("(root)", "{e}")))?;

		Ok(config)
	}
}

fn true_fn() -> bool { true }

fn default_address() -> IpAddr { IpAddr::V4(Ipv4Addr::LOCALHOST) }

fn default_port() -> u16 { 8448 }

fn default_database_path() -> PathBuf { PathBuf::from("vellum_db") }

fn default_log() -> String { "info".to_owned() }

fn default_client_shutdown_timeout() -> u64 { 10 }

fn default_request_timeout() -> u64 { 35 }

fn default_rocksdb_max_open_files() -> i32 { 512 }

fn default_max_upload_size() -> usize { 20 * 1024 * 1024 }

fn default_media_id_length() -> usize { 32 }

fn default_forced_attachment_types() -> Vec<String> {
	[
		"application/octet-stream",
		"application/xhtml+xml",
		"application/xml",
		"image/svg+xml",
		"text/html",
		"text/javascript",
		"text/xml",
	]
	.map(str::to_owned)
	.to_vec()
}

fn default_thumbnail_sizes() -> Vec<ThumbnailSize> {
	[(32, 32), (96, 96), (320, 240), (640, 480), (800, 600)]
		.map(|(width, height)| ThumbnailSize { width, height })
		.to_vec()
}

fn default_thumbnail_parallelism() -> usize { 2 }

fn default_thumbnail_cache_capacity() -> usize { 32 * 1024 * 1024 }

fn default_helper_timeout() -> u64 { 20 }

fn default_helper_output_limit() -> usize { 32 * 1024 * 1024 }

fn default_video_helper() -> Vec<String> {
	[
		"ffmpeg", "-v", "quiet", "-i", "{input}", "-frames:v", "1", "-f", "image2pipe",
		"-c:v", "png", "-",
	]
	.map(str::to_owned)
	.to_vec()
}

fn default_pdf_helper() -> Vec<String> {
	["pdftoppm", "-png", "-f", "1", "-singlefile", "{input}"]
		.map(str::to_owned)
		.to_vec()
}

fn default_heif_helper() -> Vec<String> {
	["heif-convert", "{input}", "{output}"]
		.map(str::to_owned)
		.to_vec()
}

fn default_audio_decode_helper() -> Vec<String> {
	["ffmpeg", "-v", "quiet", "-i", "{input}", "-f", "wav", "-"]
		.map(str::to_owned)
		.to_vec()
}

fn default_svg_max_size() -> usize { 1024 * 1024 }

fn default_url_preview_max_spider_size() -> usize { 256 * 1024 }

fn default_url_preview_max_redirects() -> usize { 4 }

fn default_url_preview_tracking_params() -> Vec<String> {
	[
		"utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "fbclid",
		"gclid", "mc_eid",
	]
	.map(str::to_owned)
	.to_vec()
}

fn default_ip_range_denylist() -> Vec<String> {
	[
		"127.0.0.0/8",
		"10.0.0.0/8",
		"172.16.0.0/12",
		"192.168.0.0/16",
		"100.64.0.0/10",
		"192.0.0.0/24",
		"169.254.0.0/16",
		"192.88.99.0/24",
		"198.18.0.0/15",
		"192.0.2.0/24",
		"198.51.100.0/24",
		"203.0.113.0/24",
		"224.0.0.0/4",
		"::1/128",
		"fe80::/10",
		"fc00::/7",
		"2001:db8::/32",
		"ff00::/8",
		"fec0::/10",
	]
	.map(str::to_owned)
	.to_vec()
}

fn default_federation_timeout() -> u64 { 25 }

fn default_federation_concurrency() -> usize { 4 }

fn default_federation_negative_ttl() -> u64 { 300 }

fn default_directory_depth() -> u8 { 2 }

fn default_directory_length() -> u8 { 2 }

fn default_s3_request_duration() -> u64 { 30 }

fn default_download_rate() -> RatePolicy {
	RatePolicy { limit: 60, window_ms: 60_000, burst: 30 }
}

fn default_upload_rate() -> RatePolicy {
	RatePolicy { limit: 10, window_ms: 60_000, burst: 5 }
}

fn default_thumbnail_rate() -> RatePolicy {
	RatePolicy { limit: 120, window_ms: 60_000, burst: 60 }
}

fn default_preview_rate() -> RatePolicy {
	RatePolicy { limit: 10, window_ms: 60_000, burst: 5 }
}

#[cfg(test)]
mod tests {
	use figment::{
		Figment,
		providers::{Format, Toml},
	};

	use super::Config;

	#[test]
	fn minimal_config_fills_defaults() {
		let config: Config = Figment::new()
			.merge(Toml::string("server_name = \"example.com\""))
			.extract()
			.expect("minimal config parses");

		assert_eq!(config.server_name.as_str(), "example.com");
		assert_eq!(config.port, 8448);
		assert_eq!(config.max_upload_size, 20 * 1024 * 1024);
		assert_eq!(config.thumbnail_sizes.len(), 5);
		assert!(config.media_unique_ids_per_upload);
		assert!(config.user_quota_bytes.is_none());
		assert!(super::check(&config).is_ok());
	}

	#[test]
	fn storage_backend_parses() {
		let config: Config = Figment::new()
			.merge(Toml::string(
				r#"
					server_name = "example.com"

					[media_storage]
					backend = "filesystem"
					path = "/tmp/media"

					[media_storage.directory_structure]
					depth = 4
					length = 1
				"#,
			))
			.extract()
			.expect("storage config parses");

		match config.media_storage {
			| super::MediaStorageConfig::Filesystem { path, directory_structure } => {
				assert_eq!(path.as_deref(), Some(std::path::Path::new("/tmp/media")));
				assert_eq!(directory_structure.depth, 4);
				assert_eq!(directory_structure.length, 1);
			},
			| super::MediaStorageConfig::S3(..) => panic!("expected filesystem backend"),
		}
	}
}
