use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global subscriber that logs to stdout.
///
/// `RUST_LOG` overrides the default level (`info`, or `debug` when `verbose`).
/// Fails if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
