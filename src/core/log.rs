//! Logging is `tracing` end to end; this module re-exports the macros so
//! dependent crates import them from one place.

pub use tracing::{debug, error, info, trace, warn};

pub use crate::{debug_error, debug_info, debug_warn};
