//! Shared constants for sampling and exit status mapping

/// Sampling intervals
pub mod sampling {
    use std::time::Duration;

    /// Default interval between process table queries
    pub const DEFAULT: Duration = Duration::from_secs(1);

    /// Interval used by tests that want several ticks quickly
    pub const FAST: Duration = Duration::from_millis(20);
}

/// Program exit codes for failures that are not the child's own.
///
/// These follow the convention of `env(1)` and `timeout(1)`.
pub mod exit_codes {
    /// Supervisor-level failure (configuration, query tool, report channel)
    pub const SUPERVISOR_FAILURE: i32 = 125;

    /// The command exists but could not be started
    pub const COMMAND_NOT_EXECUTABLE: i32 = 126;

    /// The command could not be found
    pub const COMMAND_NOT_FOUND: i32 = 127;

    /// Offset added to a terminating signal number
    pub const SIGNAL_BASE: i32 = 128;
}

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "PEAKMEM_LOG";
