use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::Build;

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};
pub use sloggers::types::Severity;

/// Builds the stderr terminal logger used by the binaries. Components that
/// want to log hold a child logger created with `log.new(o!())`.
pub fn init(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().expect("Error building terminal logger")
}
