//! peakmem: run a command and report the peak resident memory of its
//! process tree.

pub mod config;
pub mod core;
pub mod error;
pub mod process_table;
pub mod report;

pub use crate::config::{Backend, MemoryUnit, MonitorConfig, OutputConfig, PeakConfig, Scope};
pub use crate::core::{
    CommandSpec, Coordinator, ExitStatus, MemorySampler, Outcome, PeakMemory, Report,
};
pub use crate::error::{PeakError, QueryError, Result};
pub use crate::process_table::{ProcessRow, ProcessTableQuery};
pub use crate::report::Reporter;

use std::fs::File;
use std::io::{self, Write};

/// Run `command` under supervision and write the report to the configured
/// channel. Returns the exit code the program should use.
pub fn run_monitor(command: &CommandSpec, config: &PeakConfig) -> Result<i32> {
    let coordinator = Coordinator::new(config.monitor.clone())?;
    let reporter = Reporter::new(config.output.clone());

    // open the report file up front so a bad path fails before the command runs
    let report_file = match &config.output.path {
        Some(path) => Some(File::create(path).map_err(PeakError::StdioForwarding)?),
        None => None,
    };

    let report = coordinator.run(command)?;

    match report_file {
        Some(mut file) => {
            if let Outcome::SpawnFailed(failure) = &report.outcome {
                let _ = writeln!(
                    io::stderr(),
                    "peakmem: failed to run '{}': {}",
                    failure.program, failure.message
                );
            }
            reporter.report(&report, &mut file)
        }
        None => reporter.report(&report, &mut io::stderr().lock()),
    }
}
