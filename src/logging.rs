use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber. Level is controlled by `RUST_LOG`,
/// defaulting to `info` so a fresh checkout is quiet but not silent.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .try_init()
        .ok();
}
