//! Subscriber bootstrap for the driver binary

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber; `RUST_LOG` wins over `default_filter`
///
/// # Errors
/// An unparsable `default_filter`, or a subscriber already installed.
pub fn init(default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}
