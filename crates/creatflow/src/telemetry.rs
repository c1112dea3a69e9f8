//! Process-wide logging setup.

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Installs the global subscriber and routes `log` records into it.
///
/// `RUST_LOG` wins over the configured filter. Calling this more than once
/// keeps the first subscriber.
pub fn init(config: &LogConfig) {
    // the bridge may already be set by an embedding application
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if installed.is_err() {
        log::debug!("Tracing subscriber already installed");
    }
}
