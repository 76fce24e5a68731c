use vellum::Server;
use vellum_core::{Result, args, config::Config, debug_info, runtime};

fn main() -> Result {
	let args = args::parse();

	let config_paths = args
		.config
		.as_deref()
		.into_iter()
		.flat_map(<[_]>::iter)
		.map(std::path::PathBuf::as_path);

	let mut config = Config::load(config_paths)?;
	if let Some(port) = args.port {
		config.port = port;
	}

	if args.check_config {
		vellum_core::config::check(&config)?;
		println!("Configuration OK");
		return Ok(());
	}

	let runtime = runtime::new(config.worker_threads)?;
	let server = Server::new(config, Some(runtime.handle().clone()))?;

	vellum::exec(&server, runtime)?;

	debug_info!("Exit");
	Ok(())
}
