//! Final report output
//!
//! The report goes to its own channel (stderr unless a file was given), never
//! to the child's stdout. The returned exit code is what the program should
//! exit with.

use crate::config::{OutputConfig, ReportFormat};
use crate::core::coordinator::{Outcome, Report};
use crate::core::supervisor::ExitStatus;
use crate::error::{PeakError, Result};
use colored::*;
use serde::Serialize;
use std::io::Write;

const RULE: &str = "----------------------";

#[derive(Serialize)]
struct JsonReport<'a> {
    peak_rss_kb: Option<u64>,
    exit_code: i32,
    #[serde(flatten)]
    report: &'a Report,
}

pub struct Reporter {
    config: OutputConfig,
}

impl Reporter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Write `report` to `out` and return the program exit code
    pub fn report<W: Write>(&self, report: &Report, out: &mut W) -> Result<i32> {
        match self.config.format {
            ReportFormat::Human => self.write_human(report, out),
            ReportFormat::Json => self.write_json(report, out),
        }
        .map_err(|e| match e {
            PeakError::Io(io) => PeakError::StdioForwarding(io),
            other => other,
        })?;

        Ok(report.exit_code())
    }

    fn write_human<W: Write>(&self, report: &Report, out: &mut W) -> Result<()> {
        let status = match &report.outcome {
            Outcome::SpawnFailed(failure) => {
                // with a report file the message has already gone to stderr
                if self.config.path.is_none() {
                    writeln!(
                        out,
                        "peakmem: failed to run '{}': {}",
                        failure.program, failure.message
                    )?;
                }
                return Ok(());
            }
            Outcome::Exited(status) => *status,
        };

        let peak = match report.peak.as_ref().and_then(|p| p.rss_kb()) {
            Some(kb) => self.config.unit.format(kb),
            None => "n/a (no samples)".to_string(),
        };
        let peak = if self.config.color {
            peak.bold().to_string()
        } else {
            peak
        };

        writeln!(out, "{}", RULE)?;
        writeln!(out, "Max memory use: {}", peak)?;
        writeln!(out, "{}", RULE)?;

        match status {
            ExitStatus::Code(0) => {}
            ExitStatus::Code(code) => {
                let line = format!("Child exited with status: {}", code);
                writeln!(out, "{}", self.paint_failure(line))?;
            }
            ExitStatus::Signal(signal) => {
                let line = format!("Child terminated by signal: {}", signal);
                writeln!(out, "{}", self.paint_failure(line))?;
            }
        }

        out.flush()?;
        Ok(())
    }

    fn write_json<W: Write>(&self, report: &Report, out: &mut W) -> Result<()> {
        let json = JsonReport {
            peak_rss_kb: report.peak.as_ref().and_then(|p| p.rss_kb()),
            exit_code: report.exit_code(),
            report,
        };
        serde_json::to_writer(&mut *out, &json).map_err(|e| {
            if e.is_io() {
                PeakError::Io(e.into())
            } else {
                PeakError::Serialization(e)
            }
        })?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }

    fn paint_failure(&self, line: String) -> String {
        if self.config.color {
            line.red().to_string()
        } else {
            line
        }
    }
}
