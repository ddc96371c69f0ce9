#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global fmt subscriber. `level` is the base filter; `RUST_LOG`
/// still wins when set.
pub fn init_logging(level: &str) -> Result<()> {
    let default = format!("{level},tube_harvest={level},ureq=warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("installing log subscriber: {err}"))
}
