//! Run configuration
//!
//! `MonitorConfig` controls sampling, `OutputConfig` controls the report.
//! Both are grouped in `PeakConfig`.

use crate::core::constants::sampling;
use crate::error::{PeakError, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// Mechanism used to read the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Backend {
    /// Run `ps` and parse its output
    #[default]
    Ps,
    /// Read the process table in-process through sysinfo
    Sysinfo,
    /// Walk /proc directly (Linux only)
    Procfs,
}

/// Which rows of the process table count towards a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// The child and all of its descendants
    #[default]
    Tree,
    /// Every process visible to the query
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MemoryUnit {
    /// Kilobytes, as reported by the process table
    #[default]
    Kb,
    /// Megabytes with three decimals
    Mb,
}

impl MemoryUnit {
    pub fn format(&self, kilobytes: u64) -> String {
        match self {
            MemoryUnit::Kb => format!("{} kB", kilobytes),
            MemoryUnit::Mb => format!("{:.3} MB", kilobytes as f64 / 1024.0),
        }
    }
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub backend: Backend,
    pub scope: Scope,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: sampling::DEFAULT,
            backend: Backend::default(),
            scope: Scope::default(),
        }
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(PeakError::InvalidConfiguration(
                "sampling interval must be greater than zero".to_string(),
            ));
        }
        if self.backend == Backend::Procfs && !cfg!(target_os = "linux") {
            return Err(PeakError::InvalidConfiguration(
                "the procfs backend is only available on Linux".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.config.interval = Duration::from_millis(ms);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.config.scope = scope;
        self
    }

    pub fn build(self) -> Result<MonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Report configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputConfig {
    pub format: ReportFormat,
    pub unit: MemoryUnit,
    /// Write the report here instead of stderr
    pub path: Option<PathBuf>,
    pub color: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PeakConfig {
    pub monitor: MonitorConfig,
    pub output: OutputConfig,
}
