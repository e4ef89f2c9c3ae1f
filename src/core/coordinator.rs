//! Run sequencing
//!
//! Spawn, start sampling, wait for exit without reaping, take the final
//! sample, stop sampling, then reap. The child's pid is never released while
//! the sampler can still query it.

use crate::config::MonitorConfig;
use crate::core::sampler::{MemorySampler, PeakMemory};
use crate::core::supervisor::{CommandSpec, ExitStatus, ProcessSupervisor};
use crate::error::{PeakError, Result};
use crate::process_table::{self, ProcessTableQuery};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Why the command never ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnFailure {
    pub program: String,
    pub message: String,
    pub exit_code: i32,
}

impl SpawnFailure {
    fn from_error(err: &PeakError) -> Option<Self> {
        match err {
            PeakError::Spawn { program, source } => Some(Self {
                program: program.clone(),
                message: source.to_string(),
                exit_code: err.exit_code(),
            }),
            _ => None,
        }
    }

    pub fn not_found(&self) -> bool {
        self.exit_code == crate::core::constants::exit_codes::COMMAND_NOT_FOUND
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Exited(ExitStatus),
    SpawnFailed(SpawnFailure),
}

/// Result of one supervised run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub command: String,
    pub pid: Option<u32>,
    /// Absent when the command could not be spawned or the sampler failed
    pub peak: Option<PeakMemory>,
    pub outcome: Outcome,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl Report {
    /// Program exit code derived from the outcome
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Outcome::Exited(status) => status.exit_code(),
            Outcome::SpawnFailed(failure) => failure.exit_code,
        }
    }
}

pub struct Coordinator {
    config: MonitorConfig,
}

impl Coordinator {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run `command` with the configured process table backend
    pub fn run(&self, command: &CommandSpec) -> Result<Report> {
        let query = process_table::for_backend(self.config.backend, self.config.scope)?;
        self.run_with_query(command, query)
    }

    /// Run `command`, sampling through `query`
    pub fn run_with_query<Q>(&self, command: &CommandSpec, mut query: Q) -> Result<Report>
    where
        Q: ProcessTableQuery + 'static,
    {
        query.probe()?;

        let started = Instant::now();
        let mut child = match ProcessSupervisor::spawn(command) {
            Ok(child) => child,
            Err(err) => {
                let Some(failure) = SpawnFailure::from_error(&err) else {
                    return Err(err);
                };
                info!("could not spawn '{}': {}", failure.program, failure.message);
                return Ok(Report {
                    command: command.display(),
                    pid: None,
                    peak: None,
                    outcome: Outcome::SpawnFailed(failure),
                    elapsed: started.elapsed(),
                });
            }
        };
        let pid = child.pid();

        let sampler = match MemorySampler::start(query, pid, self.config.interval) {
            Ok(sampler) => sampler,
            Err(err) => {
                // nothing will watch the child, so do not leave it running unsupervised
                let _ = child.wait();
                return Err(err);
            }
        };

        let exited = child.await_exit();
        // the drain runs even if waiting failed, so whatever was captured survives
        if let Err(err) = sampler.drain() {
            warn!("final sample not taken: {}", err);
        }
        // a broken sampler costs the peak, never the child's status
        let peak = match sampler.stop() {
            Ok(peak) => Some(peak),
            Err(err) => {
                warn!("no peak available: {}", err);
                None
            }
        };
        if let Err(err) = exited {
            warn!("waiting for child {} failed: {}", pid, err);
        }

        let status = child.wait()?;
        debug!(
            "run finished: {} with peak {:?}",
            status,
            peak.as_ref().and_then(|p| p.rss_kb())
        );

        Ok(Report {
            command: command.display(),
            pid: Some(pid),
            peak,
            outcome: Outcome::Exited(status),
            elapsed: started.elapsed(),
        })
    }
}
