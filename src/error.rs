use std::path::PathBuf;
use thiserror::Error;

use crate::model::Stage;

/// Fatal conditions that abort the remaining stages of a run.
///
/// Nothing here retries; every variant stops the pipeline where it occurred
/// and leaves already-produced logs and backups on disk for diagnosis.
#[derive(Debug, Error)]
pub enum RunError {
    /// Only 1-, 2- and 3-dimensional meshes can be split across ranks.
    #[error("unsupported dimensionality {0}: expected 1, 2 or 3")]
    InvalidDimension(u32),

    /// The requested rank count cannot produce a usable process grid.
    #[error("invalid core count {0}: expected a positive number of MPI ranks")]
    InvalidCoreCount(u32),

    /// A configuration source that should have been generated is absent.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// A scalar the run depends on never appeared in the parameter file.
    #[error("parameter `{name}` not found in {file}")]
    MissingParameter { name: &'static str, file: PathBuf },

    /// An external build step exited non-zero; its output is in `log`.
    #[error("build failed (see {log}): exit {status}")]
    BuildFailed { log: PathBuf, status: i32 },

    /// `results/` or `params/` already exists; never merged or overwritten.
    #[error("archive directory already exists: {0}")]
    DirectoryExists(PathBuf),

    /// The run was cancelled; the child was killed and partial logs flushed.
    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Wrap an error with the stage it occurred in, for user-facing reports.
    pub fn in_stage(self, stage: Stage) -> StageError {
        StageError { stage, source: self }
    }
}

/// A `RunError` tagged with the pipeline stage that produced it.
#[derive(Debug, Error)]
#[error("{} failed: {source}", .stage.describe())]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: RunError,
}

/// The token following `time=` did not parse as a number.
///
/// Recovered locally: the raw line still reaches the run log, only the
/// structured event is dropped.
#[derive(Debug, Error)]
#[error("malformed time value {value:?} in log line")]
pub struct MalformedLogLine {
    pub value: String,
}
