use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a stderr tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `debug` enables this crate's debug output.
pub fn initialize_logging(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}={default_level}", env!("CARGO_CRATE_NAME"))));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
