//! Error types for peakmem
//!
//! `PeakError` covers everything that ends a run. `QueryError` covers a single
//! failed sampling tick, which the sampler absorbs and logs.

use std::io;
use thiserror::Error;

use crate::core::constants::exit_codes;

/// Fatal errors surfaced to the caller
#[derive(Debug, Error)]
pub enum PeakError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("process table query unavailable: {0}")]
    QueryUnavailable(String),

    #[error("report channel unusable: {0}")]
    StdioForwarding(#[source] io::Error),

    #[error("sampler thread panicked")]
    SamplerPanicked,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PeakError {
    /// Program exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            PeakError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                exit_codes::COMMAND_NOT_FOUND
            }
            PeakError::Spawn { .. } => exit_codes::COMMAND_NOT_EXECUTABLE,
            _ => exit_codes::SUPERVISOR_FAILURE,
        }
    }
}

/// A single sampling tick that produced no usable reading
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("malformed process table at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("process table query failed: {0}")]
    Failed(String),

    #[error("process table query I/O error: {0}")]
    Io(#[from] io::Error),
}

impl QueryError {
    pub fn parse(line: usize, reason: impl Into<String>) -> Self {
        QueryError::Parse {
            line,
            reason: reason.into(),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self, QueryError::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, PeakError>;
