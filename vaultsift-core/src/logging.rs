//! Shared logging utilities for vaultsift binaries.
//!
//! Diagnostics go to stderr so they never interleave with records written to
//! stdout.

use crate::Result;

/// Maps CLI verbosity flags to a tracing level.
///
/// quiet wins over any verbosity and keeps warnings, so the unsupported-type
/// summary is never silenced; otherwise 0=INFO, 1=DEBUG, 2+=TRACE.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::WARN,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show WARN and ERROR level logs
///
/// # Example
/// ```rust,no_run
/// use vaultsift_core::logging::init_logging;
///
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(level_for(verbose, quiet))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| {
            crate::error::SiftError::configuration(format!("Failed to initialize logging: {}", e))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Logging can only be initialized once per test process, so only the
    // level mapping is exercised here.
    #[test]
    fn test_verbosity_levels() {
        let test_cases = [
            ((true, 0), tracing::Level::WARN),
            ((true, 5), tracing::Level::WARN),
            ((false, 0), tracing::Level::INFO),
            ((false, 1), tracing::Level::DEBUG),
            ((false, 2), tracing::Level::TRACE),
            ((false, 10), tracing::Level::TRACE),
        ];

        for ((quiet, verbose), expected) in test_cases {
            assert_eq!(
                level_for(verbose, quiet),
                expected,
                "Failed for quiet={}, verbose={}",
                quiet,
                verbose
            );
        }
    }

    #[test]
    fn test_quiet_keeps_skip_summary_level() {
        // The unsupported-type summary is emitted at WARN
        assert!(level_for(0, true) >= tracing::Level::WARN);
        assert!(level_for(0, true) < tracing::Level::INFO);
    }
}
