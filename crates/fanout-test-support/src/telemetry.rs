//! Tracing bootstrap for test binaries.

use fanout_telemetry::{LogFormat, LoggingConfig, init_logging};

/// Install a pretty `debug`-level tracing subscriber for the current test
/// binary, so contained failures (failing handlers, dropped payloads) show
/// up in test output.
///
/// Only the first call in a process installs anything; later calls report
/// a conflict, which is ignored so every test can call this unconditionally.
pub fn init_test_tracing() {
    let _ = init_logging(&LoggingConfig {
        level: "debug",
        format: LogFormat::Pretty,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_safe() {
        init_test_tracing();
        init_test_tracing();
    }
}
