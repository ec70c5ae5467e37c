use tracing::Level;

/// Initialize tracing for the process.
///
/// `default_level` accepts the usual level names ("error", "warn", "info",
/// "debug", "trace"); anything unrecognized falls back to info. Uses
/// `try_init` so tests and embedding applications can call this more than
/// once without panicking.
pub fn init(default_level: &str) {
    let level: Level = default_level.parse().unwrap_or(Level::INFO);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
