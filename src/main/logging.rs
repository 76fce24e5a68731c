use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};
use vellum_core::{Result, config::Config, err};

pub(crate) fn init(config: &Config) -> Result {
	let filter = EnvFilter::builder()
		.parse(&config.log)
		.map_err(|e| err!(Config("log", "{e}.")))?;

	let console_layer = fmt::Layer::new()
		.with_ansi(config.log_colors)
		.with_thread_ids(config.log_thread_ids)
		.with_filter(filter);

	let subscriber = Registry::default().with(console_layer);

	tracing::subscriber::set_global_default(subscriber)
		.map_err(|e| err!("Failed to initialize the logging subscriber: {e}"))
}
