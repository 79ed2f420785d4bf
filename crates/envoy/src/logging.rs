use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directives are read from this variable, e.g. `PARLANCE_LOG=parlance_engine=debug`.
pub const LOG_VAR: &str = "PARLANCE_LOG";

/// Logs go to stderr so they never interleave with the streamed reply on stdout.
/// Default level: WARN.
pub fn init() {
    let env_filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    tracing::debug!("Tracing initialized");
}
