//! Log output for the `keysweep` binary.
//!
//! Events go to stderr through a `fmt` layer. Stdout is reserved for the
//! single result line printed by the reporting process. `RUST_LOG` overrides
//! the default `info` filter, e.g. `RUST_LOG=keysweep=debug`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true),
        )
        .try_init()?;
    Ok(())
}
