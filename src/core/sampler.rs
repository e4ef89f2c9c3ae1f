//! Periodic memory sampling
//!
//! The sampler runs on its own thread and is the only writer of the peak.
//! The peak leaves the thread through `SamplerHandle::stop`, after the join.

use crate::error::{PeakError, Result};
use crate::process_table::{ProcessRow, ProcessTableQuery};
use log::{debug, warn};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One aggregate reading of the process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub taken_at: Instant,
    pub rss_kb: u64,
    /// Rows that contributed to `rss_kb`
    pub processes: usize,
}

impl MemorySample {
    /// Sum resident memory over every row
    pub fn from_rows(rows: &[ProcessRow]) -> Self {
        Self {
            taken_at: Instant::now(),
            rss_kb: rows.iter().fold(0u64, |acc, r| acc.saturating_add(r.rss_kb)),
            processes: rows.len(),
        }
    }
}

/// Counters for the ticks of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// Queries issued
    pub attempted: u32,
    /// Queries that produced a sample, including empty ones
    pub recorded: u32,
    /// Queries whose output was discarded
    pub skipped: u32,
    /// Skipped because the output could not be parsed
    pub parse_failures: u32,
}

/// Highest sample seen so far. Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeakMemory {
    rss_kb: Option<u64>,
    /// Processes in the tree when the peak was taken
    processes: usize,
    ticks: TickStats,
}

impl PeakMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sample in. Returns true when it became the new peak.
    pub fn observe(&mut self, sample: &MemorySample) -> bool {
        let replaces = match self.rss_kb {
            None => true,
            Some(peak) => sample.rss_kb > peak,
        };
        if replaces {
            self.rss_kb = Some(sample.rss_kb);
            self.processes = sample.processes;
        }
        replaces
    }

    /// Peak in kilobytes, or `None` when no tick produced a sample
    pub fn rss_kb(&self) -> Option<u64> {
        self.rss_kb
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    pub fn ticks(&self) -> TickStats {
        self.ticks
    }
}

enum Control {
    /// Take one last sample, acknowledge it, then stop scheduling ticks
    Drain(Sender<()>),
    Stop,
}

/// Entry point for starting a sampling thread
pub struct MemorySampler;

impl MemorySampler {
    /// Start sampling `target` every `interval`. The first tick runs at once.
    pub fn start<Q>(query: Q, target: u32, interval: Duration) -> Result<SamplerHandle>
    where
        Q: ProcessTableQuery + 'static,
    {
        let (control, rx) = mpsc::channel();
        let worker = SamplerLoop {
            query,
            target,
            interval,
            peak: PeakMemory::new(),
        };

        let handle = thread::Builder::new()
            .name("peakmem-sampler".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(SamplerHandle { control, handle })
    }
}

/// Handle to a running sampler
pub struct SamplerHandle {
    control: Sender<Control>,
    handle: JoinHandle<PeakMemory>,
}

impl SamplerHandle {
    /// Run one final tick and wait for it to finish. No scheduled tick runs
    /// after this returns.
    pub fn drain(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.control
            .send(Control::Drain(ack_tx))
            .map_err(|_| PeakError::SamplerPanicked)?;
        ack_rx.recv().map_err(|_| PeakError::SamplerPanicked)
    }

    /// Stop the loop and return the peak. Blocks until any in-flight tick
    /// completes.
    pub fn stop(self) -> Result<PeakMemory> {
        // the loop may already be gone if it panicked; join reports that
        let _ = self.control.send(Control::Stop);
        self.handle.join().map_err(|_| PeakError::SamplerPanicked)
    }
}

struct SamplerLoop<Q> {
    query: Q,
    target: u32,
    interval: Duration,
    peak: PeakMemory,
}

impl<Q: ProcessTableQuery> SamplerLoop<Q> {
    fn run(mut self, rx: Receiver<Control>) -> PeakMemory {
        debug!(
            "sampling pid {} every {:?} via {}",
            self.target,
            self.interval,
            self.query.name()
        );

        let mut next_tick = Instant::now();
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    self.tick();
                    // an overrunning tick delays the next one instead of overlapping it
                    next_tick = (next_tick + self.interval).max(Instant::now());
                }
                Ok(Control::Drain(ack)) => {
                    self.tick();
                    let _ = ack.send(());
                    // only a stop is accepted from here on
                    let _ = rx.recv();
                    break;
                }
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("sampler stopped after {:?}", self.peak.ticks);
        self.peak
    }

    fn tick(&mut self) {
        self.peak.ticks.attempted += 1;

        match self.query.query(self.target) {
            Ok(rows) => {
                let sample = MemorySample::from_rows(&rows);
                self.peak.ticks.recorded += 1;
                if rows.is_empty() {
                    debug!("no rows for pid {}, recording 0", self.target);
                }
                let new_peak = self.peak.observe(&sample);
                debug!(
                    "sample: {} kB across {} processes{}",
                    sample.rss_kb,
                    sample.processes,
                    if new_peak { " (new peak)" } else { "" }
                );
            }
            Err(e) => {
                self.peak.ticks.skipped += 1;
                if e.is_parse_failure() {
                    self.peak.ticks.parse_failures += 1;
                }
                warn!("skipping sample: {}", e);
            }
        }
    }
}
