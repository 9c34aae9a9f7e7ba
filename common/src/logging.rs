use tracing_subscriber::{fmt, EnvFilter};

/// Installs the process-wide tracing subscriber, honoring `RUST_LOG` via
/// `EnvFilter` and defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
