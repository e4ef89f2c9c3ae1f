//! Core supervision and sampling
//!
//! The supervisor owns the child process, the sampler owns the peak, and the
//! coordinator sequences the two.

pub mod constants;
pub mod coordinator;
pub mod sampler;
pub mod supervisor;

// Re-export main types
pub use coordinator::{Coordinator, Outcome, Report, SpawnFailure};
pub use sampler::{MemorySample, MemorySampler, PeakMemory, SamplerHandle, TickStats};
pub use supervisor::{ChildProcess, ChildState, CommandSpec, ExitStatus, ProcessSupervisor};
