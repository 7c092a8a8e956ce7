use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Install a stderr fmt subscriber filtered by `filter` (`EnvFilter` syntax).
///
/// A subscriber installed earlier (e.g. by a test harness) is left in place.
pub fn install(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter).map_err(|err| anyhow!("invalid log filter `{filter}`: {err}"))?;
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}
