//! Structured diagnostics (SPEC_FULL §4.9): a `tracing` layer independent of
//! the renderer's `render`/`warn`/`error` channel. Always writes to stderr so
//! piping stdout to a file never captures diagnostic noise.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps `-v` repeat count to a base log level, then lets `RUST_LOG`
/// override it when set (`EnvFilter` takes precedence for any directive it
/// parses out of the environment).
///
/// - 0: warnings and errors only.
/// - 1: adds informational lifecycle events.
/// - 2+: adds per-retry backoff timing and raw watch events (debug/trace).
pub fn init(verbosity: u8) {
    let base = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(base.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
