pub mod args;
pub mod config;
pub mod debug;
pub mod error;
pub mod info;
pub mod log;
pub mod mxc;
pub mod runtime;
pub mod server;
pub mod utils;

pub use ::http;
pub use ::ruma;
pub use ::toml;
pub use ::tracing;
pub use config::Config;
pub use error::{Error, ErrorKind};
pub use info::version;
pub use log::{debug, error, info, trace, warn};
pub use mxc::Mxc;
pub use server::Server;
pub use utils::result::Result;

pub use crate as vellum_core;
