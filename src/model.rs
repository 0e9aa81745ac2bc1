use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub dimensionality: u32,
    pub requested_cores: u32,
    pub workdir: PathBuf,
    pub param_file: PathBuf,
    pub convert_file: PathBuf,
    pub simulation_makefile: PathBuf,
    pub converter_makefile: PathBuf,
    pub launcher: String,
    pub simulation_binary: String,
    pub converter_binary: String,
}

/// Process-grid shape used to split the computational mesh across MPI ranks.
///
/// `actual_cores` is always `ni * nj * nk` and is authoritative for every
/// downstream step; it is not guaranteed to equal the requested core count
/// (the rounding is imperfect by design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    pub ni: u32,
    pub nj: u32,
    pub nk: u32,
    pub actual_cores: u32,
}

/// Scalars extracted from the parameter file during patching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Terminal simulation time, upper bound for progress reporting.
    pub tmax: f64,
    /// Number of snapshots the run is expected to emit.
    pub nshot: u32,
}

/// One snapshot observed in the child's output stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub index: u32,
    pub sim_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Decompose,
    Patch,
    BuildSimulation,
    Simulate,
    BuildConverter,
    Convert,
    Archive,
}

impl Stage {
    pub fn describe(self) -> &'static str {
        match self {
            Stage::Decompose => "computing process grid",
            Stage::Patch => "updating parameter files",
            Stage::BuildSimulation => "building simulation",
            Stage::Simulate => "running simulation",
            Stage::BuildConverter => "building converter",
            Stage::Convert => "creating VTK files",
            Stage::Archive => "archiving results",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    StageStarted {
        stage: Stage,
    },
    PlanComputed {
        plan: DecompositionPlan,
    },
    /// Simulation-time progress; `fraction` is already clamped to [0, 1].
    Progress {
        sim_time: f64,
        fraction: f64,
    },
    Snapshot {
        record: SnapshotRecord,
    },
    Info(InfoEvent),
    RunCompleted {
        // Box to keep RunEvent size small; RunSummary is the largest variant.
        summary: Box<RunSummary>,
    },
}

/// Structured info events emitted by the engine and consumed by the CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    LaunchingSimulation { cores: u32 },
    MalformedLogLine { line: String },
}

impl InfoEvent {
    /// Render a human-readable message for the CLI layer.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::LaunchingSimulation { cores } => {
                format!("Beginning execution with {} CPUs", cores)
            }
            InfoEvent::MalformedLogLine { line } => {
                format!("Skipping unparseable time value in output line: {:?}", line)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp_utc: String,
    pub plan: DecompositionPlan,
    pub params: SimulationParams,
    /// Snapshot lines observed in the run's output.
    pub snapshots: u32,
    pub results_dir: PathBuf,
    pub params_dir: PathBuf,
    pub elapsed_secs: f64,
}
