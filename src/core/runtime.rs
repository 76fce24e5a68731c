use std::time::Duration;

use tokio::runtime;

use crate::{Result, utils::sys};

const WORKER_NAME: &str = "vellum:worker";
const WORKER_KEEPALIVE: u64 = 36;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(2500);

pub use runtime::Handle;
pub type Runtime = runtime::Runtime;

/// Construct the multi-threaded I/O runtime. The thumbnail CPU pool is not
/// here; it is a semaphore over the blocking pool owned by the media
/// service so decode storms cannot occupy these workers.
pub fn new(worker_threads: Option<usize>) -> Result<Runtime> {
	let worker_threads = worker_threads
		.unwrap_or_else(sys::available_parallelism)
		.max(1);

	let runtime = runtime::Builder::new_multi_thread()
		.enable_io()
		.enable_time()
		.thread_name(WORKER_NAME)
		.worker_threads(worker_threads)
		.thread_keep_alive(Duration::from_secs(WORKER_KEEPALIVE))
		.build()?;

	Ok(runtime)
}

/// Tear down the runtime, bounding how long outstanding blocking work may
/// delay process exit.
pub fn shutdown(runtime: Runtime) {
	runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
}
