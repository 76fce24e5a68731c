use std::{
	sync::{Arc, Mutex as StdMutex},
	time::{Duration, Instant},
};

use lru_cache::LruCache;
use ruma::{OwnedServerName, ServerName};
use serde::Deserialize;
use tracing::debug;
use url::Url;
use vellum_core::{Err, Result, debug_warn, err};

use crate::{service, services::OnceServices};

/// Cached destinations valid this long before re-discovery.
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

const CACHE_CAPACITY: usize = 1024;

/// Discovery document path on the peer.
const WELL_KNOWN: &str = "/.well-known/vellum/server";

/// Peer-discovery: maps a server name onto the base URL its media endpoints
/// live under. Configured overrides win; otherwise the peer's well-known
/// document is consulted, falling back to the server name itself over
/// https. Results are cached with a TTL.
pub struct Service {
	cache: StdMutex<LruCache<OwnedServerName, Cached>>,
	services: Arc<OnceServices>,
}

#[derive(Clone)]
struct Cached {
	base_url: Url,
	expire: Instant,
}

#[derive(Deserialize)]
struct WellKnownResponse {
	base_url: Url,
}

impl crate::Service for Service {
	fn build(args: &crate::Args<'_>) -> Result<Arc<Self>> {
		Ok(Arc::new(Self {
			cache: StdMutex::new(LruCache::new(CACHE_CAPACITY)),
			services: args.services.clone(),
		}))
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

impl Service {
	#[tracing::instrument(skip(self), level = "debug")]
	pub async fn resolve(&self, server_name: &ServerName) -> Result<Url> {
		let config = &self.services.server.config;

		if let Some(base_url) = config.federation_peers.get(server_name) {
			return Ok(base_url.clone());
		}

		if !config.trusted_servers.is_empty()
			&& !config
				.trusted_servers
				.iter()
				.any(|trusted| trusted == server_name)
		{
			return Err!(Request(Untrusted(
				"{server_name} is not a trusted federation peer"
			)));
		}

		if let Some(cached) = self
			.cache
			.lock()?
			.get_mut(server_name)
			.filter(|cached| cached.expire > Instant::now())
			.cloned()
		{
			return Ok(cached.base_url);
		}

		let base_url = self.discover(server_name).await?;
		self.cache.lock()?.insert(
			server_name.to_owned(),
			Cached {
				base_url: base_url.clone(),
				expire: Instant::now() + CACHE_TTL,
			},
		);

		Ok(base_url)
	}

	async fn discover(&self, server_name: &ServerName) -> Result<Url> {
		let config = &self.services.server.config;

		if config.federation_discovery {
			match self.fetch_well_known(server_name).await {
				| Ok(base_url) => {
					debug!(%server_name, %base_url, "Discovered peer via well-known");
					return Ok(base_url);
				},
				| Err(e) => {
					debug_warn!(%server_name, "Well-known discovery failed: {e}");
				},
			}
		}

		fallback_destination(server_name)
	}

	async fn fetch_well_known(&self, server_name: &ServerName) -> Result<Url> {
		let url = format!("https://{server_name}{WELL_KNOWN}");
		let response = self
			.services
			.client()
			.default
			.get(&url)
			.send()
			.await?
			.error_for_status()?;

		let well_known: WellKnownResponse = response.json().await?;
		if well_known.base_url.scheme() != "https" {
			return Err!(Request(Untrusted(
				"{server_name} well-known offers a non-https base URL"
			)));
		}

		Ok(well_known.base_url)
	}
}

fn fallback_destination(server_name: &ServerName) -> Result<Url> {
	let authority = if server_name.port().is_some() {
		server_name.as_str().to_owned()
	} else {
		format!("{}:8448", server_name.host())
	};

	Url::parse(&format!("https://{authority}"))
		.map_err(|e| err!(Request(Untrusted("Peer name does not form a base URL: {e}"))))
}

#[cfg(test)]
mod tests {
	use ruma::ServerName;

	#[test]
	fn fallback_appends_default_port() {
		let name = <&ServerName>::try_from("peer.example").unwrap();
		let url = super::fallback_destination(name).unwrap();
		assert_eq!(url.as_str(), "https://peer.example:8448/");

		let name = <&ServerName>::try_from("peer.example:8449").unwrap();
		let url = super::fallback_destination(name).unwrap();
		assert_eq!(url.as_str(), "https://peer.example:8449/");
	}
}
