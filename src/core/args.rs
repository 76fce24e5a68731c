use std::path::PathBuf;

use clap::Parser;

use crate::info;

/// Command line arguments
#[derive(Parser, Debug, Default)]
#[clap(about = info::NAME, version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
	#[arg(short, long)]
	/// Path to the configuration file. May be specified multiple times;
	/// later files override earlier ones.
	pub config: Option<Vec<PathBuf>>,

	/// Override the configured listening port.
	#[arg(long)]
	pub port: Option<u16>,

	/// Check the configuration and exit without serving.
	#[arg(long, default_value_t = false)]
	pub check_config: bool,
}

/// Parse commandline arguments into structured data
#[must_use]
pub fn parse() -> Args { Args::parse() }
