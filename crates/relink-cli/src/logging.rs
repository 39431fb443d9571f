//! Subscriber setup for the binary

use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// Honours `RUST_LOG`, defaulting to `info`. Logs go to stderr so stdout
/// stays usable for documents and JSON reports.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
