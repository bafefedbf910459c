//! Log subscriber setup for binaries and tests embedding the sender.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber, e.g. through [`tracer::init_tracer`].

#[cfg(feature = "trace")]
pub mod tracer {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::{Layer, Registry};

    /// Set to any value to silence the fmt layer entirely.
    pub const DISABLE_LOGS_ENV: &str = "STREAM_SENDER_DISABLE_LOGS";
    /// Set to any value to write logs to stderr instead of stdout.
    pub const LOG_TO_STDERR_ENV: &str = "STREAM_SENDER_LOG_TO_STDERR";

    /// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to `level`.
    ///
    /// Fails if a global subscriber is already set.
    pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.unwrap_or(default_filter).into())
            .from_env_lossy();

        if std::env::var(DISABLE_LOGS_ENV).is_ok() {
            return Ok(());
        }
        let to_stderr = std::env::var(LOG_TO_STDERR_ENV).is_ok();

        let fmt_layer = tracing_subscriber::fmt::layer().with_level(true);
        let fmt_layer = if cfg!(any(test, debug_assertions)) {
            fmt_layer.with_file(true).with_line_number(true)
        } else {
            fmt_layer
        };
        let layer = if to_stderr {
            fmt_layer.with_writer(std::io::stderr).boxed()
        } else {
            fmt_layer.boxed()
        };

        let subscriber = Registry::default().with(layer.with_filter(filter_layer));
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
