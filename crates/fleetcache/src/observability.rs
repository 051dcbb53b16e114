use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global fmt subscriber at `level`.
///
/// A valid `RUST_LOG` replaces the configured level. Calling this again
/// after a subscriber is installed has no effect.
pub fn init_tracing_with_level(level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let _ = tracing_subscriber::registry()
        .with(log_filter(level, rust_log.as_deref()))
        .with(fmt::layer().with_target(true))
        .try_init();
}

fn log_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}
