//! Log setup for suite runners embedding the harness.
//!
//! The harness itself only emits `tracing` events under the `gauntlet.*`
//! targets; this helper wires a subscriber for runners that have none of
//! their own. Safe to call more than once — later calls keep the first
//! subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbose: bool) {
    // Allow RUST_LOG overrides, fall back to the harness targets
    let default_filter = if verbose { "gauntlet=debug" } else { "gauntlet=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Log to stderr; keep formatting compact
    let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr)
        .with_target(true)
        .with_level(true)
        .compact()
        .try_init();
}
