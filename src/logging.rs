use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
///
/// Output goes to stderr so that command results on stdout stay parseable.
pub fn init_logging(level: Level, json_output: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(false)
            .with_thread_names(false);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}

fn default_directive(level: Level) -> String {
    format!("lightning_migrate={},warn", level)
}

/// Parse a `--log-level` value
pub fn parse_level(value: &str) -> Option<Level> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}
