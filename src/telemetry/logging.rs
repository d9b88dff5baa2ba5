use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::error::Error;

/// Initialize the logging system
///
/// The level defaults to `info` and can be raised or lowered with the
/// standard `RUST_LOG` environment variable.
pub fn init() -> Result<(), Error> {
    // Create environment filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Create formatting layer
    let fmt_layer = fmt::Layer::default().with_target(true).with_ansi(true);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to set global default subscriber: {}", e)))?;

    Ok(())
}
