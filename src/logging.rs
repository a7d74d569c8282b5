//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `JOBSH_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `warn`
//!
//! Everything goes to stderr; stdout belongs to the jobs.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

/// Initialise the global logging subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(level: Level) -> Result<()> {
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
