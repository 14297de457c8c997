//! Logging setup driven by the engine configuration

use crate::config::{Config, LogFormat};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing pipeline from the resolved configuration.
///
/// `RUST_LOG` overrides the configured level when set. The JSON format
/// emits one structured line per event for log aggregation; text is for
/// humans watching a terminal.
pub fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))
}
