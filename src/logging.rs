//! Diagnostic logging through `tracing`.
//!
//! Library code logs request and pipeline lifecycle events; binaries install
//! the subscriber once at startup. Logs go to stderr so stdout stays free for
//! worker messages.

/// Filter directive for a `-v` count; `quiet` wins over verbosity.
pub fn level_for(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` overrides `level` when set. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails only when a subscriber is already installed
    if subscriber.try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
