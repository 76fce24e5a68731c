use std::{sync::Arc, time::Duration};

use reqwest::redirect;
use vellum_core::{Config, Result, version};

use crate::service;

/// Purpose-built HTTP clients. Each communication class gets its own
/// connection pool and policy; the URL-preview client never follows a
/// redirect on its own because every hop must be re-validated against the
/// address denylist first.
pub struct Service {
	pub default: reqwest::Client,
	pub federation: reqwest::Client,
	pub url_preview: reqwest::Client,
}

impl crate::Service for Service {
	fn build(args: &crate::Args<'_>) -> Result<Arc<Self>> {
		let config = &args.server.config;

		let default = base(config)?
			.redirect(redirect::Policy::limited(6))
			.build()?;

		let federation = base(config)?
			.redirect(redirect::Policy::limited(3))
			.timeout(Duration::from_secs(config.federation_timeout))
			.build()?;

		let url_preview = base(config)?
			.redirect(redirect::Policy::none())
			.timeout(Duration::from_secs(config.request_timeout))
			.build()?;

		Ok(Arc::new(Self { default, federation, url_preview }))
	}

	fn name(&self) -> &str { service::make_name(std::module_path!()) }
}

fn base(config: &Config) -> Result<reqwest::ClientBuilder> {
	Ok(reqwest::Client::builder()
		.user_agent(version())
		.timeout(Duration::from_secs(config.request_timeout))
		.connect_timeout(Duration::from_secs(10))
		.pool_idle_timeout(Duration::from_secs(25)))
}
