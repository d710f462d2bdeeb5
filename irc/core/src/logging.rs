//! Root logger construction. Components receive child loggers from here
//! and log structured key/value records.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the root terminal logger.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Malformed embedded logger configuration");

    config.build_logger().expect("Failed to build root logger")
}

/// Logger that swallows everything. Used by tests and as the fallback when
/// no root logger is supplied.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
