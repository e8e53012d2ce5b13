pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the process-wide terminal logger. Severity names follow the
/// sloggers convention (`trace`, `debug`, `info`, `warning`, `error`,
/// `critical`); anything unrecognized falls back to `info`.
pub fn init(level: &str) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity(level));
    builder.destination(Destination::Stderr);
    builder.build().expect("logger construction failed")
}

/// A logger that swallows everything. Used by tests and as a default for
/// components constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

fn severity(name: &str) -> Severity {
    match name {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_accepts_records() {
        let log = discard();
        info!(log, "no destination"; "key" => 1);
    }
}
