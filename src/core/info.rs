//! Build identity reported in logs and the health endpoint.

pub const NAME: &str = "vellum";

#[must_use]
pub fn version() -> String { format!("{NAME} {}", env!("CARGO_PKG_VERSION")) }
