use crate::engine::{EngineControl, SimulationEngine};
use crate::model::{RunConfig, RunEvent, RunSummary};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "grmhd-run",
    version,
    about = "Run a GRMHD simulation under MPI and archive its results"
)]
pub struct Cli {
    /// Number of spatial dimensions of the mesh (1, 2 or 3)
    pub dimensionality: u32,

    /// Requested number of MPI cores
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub cores: u32,

    /// Parameter source patched with the process grid
    #[arg(long, default_value = "pram.f90")]
    pub param_file: PathBuf,

    /// Converter source patched with the snapshot range
    #[arg(long, default_value = "convert_vtk2dn1.f90")]
    pub convert_file: PathBuf,

    /// Makefile variant used for the simulation build
    #[arg(long, default_value = "Makefile_xgrmhd")]
    pub simulation_makefile: PathBuf,

    /// Makefile variant used for the converter build
    #[arg(long, default_value = "Makefile_convert")]
    pub converter_makefile: PathBuf,

    /// MPI launch command
    #[arg(long, default_value = "mpiexec")]
    pub launcher: String,

    /// Simulation binary started under the launcher
    #[arg(long, default_value = "./xgrmhd.exe")]
    pub simulation_binary: String,

    /// Snapshot-to-VTK converter binary
    #[arg(long, default_value = "./xconvert.exe")]
    pub converter_binary: String,

    /// Working directory holding the configuration sources and build tree
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Print the run summary as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Export the run summary as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        dimensionality: args.dimensionality,
        requested_cores: args.cores,
        workdir: args.workdir.clone(),
        param_file: args.param_file.clone(),
        convert_file: args.convert_file.clone(),
        simulation_makefile: args.simulation_makefile.clone(),
        converter_makefile: args.converter_makefile.clone(),
        launcher: args.launcher.clone(),
        simulation_binary: args.simulation_binary.clone(),
        converter_binary: args.converter_binary.clone(),
    }
}

// ASCII art from http://ascii.co.uk/art/lightning
const BANNER: &str = r"                    ,/
                  ,'/
                ,' /
              ,'  /_____,
            .'____    ,'    RAISHIN
                 /  ,'
                / ,'
               /,'
              /'";

/// The banner goes to stdout; status chatter stays on stderr.
fn banner_lines() -> impl Iterator<Item = OutputLine> {
    BANNER.lines().map(|l| OutputLine::Stdout(l.to_string()))
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    for line in banner_lines() {
        let _ = out_tx.send(line);
    }

    // Ctrl-C cancels the run: the child is killed and partial logs kept.
    tokio::spawn({
        let ctrl_tx = ctrl_tx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = ctrl_tx.send(EngineControl::Cancel);
            }
        }
    });

    let engine = SimulationEngine::new(cfg);
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            RunEvent::StageStarted { stage } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {} ==", stage.describe())));
            }
            RunEvent::PlanComputed { plan } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Process grid {}x{}x{} ({} cores)",
                    plan.ni, plan.nj, plan.nk, plan.actual_cores
                )));
            }
            RunEvent::Progress { sim_time, fraction } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "t = {:.2} ({:.0}%)",
                    sim_time,
                    fraction * 100.0
                )));
            }
            RunEvent::Snapshot { record } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Snapshot {} at t = {}",
                    record.index, record.sim_time
                )));
            }
            RunEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            RunEvent::RunCompleted { .. } => {}
        }
    }

    let summary = handle.await.context("engine task failed")??;

    if let Some(p) = args.export_json.as_deref() {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(p, json).with_context(|| format!("exporting {}", p.display()))?;
    }

    if args.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&summary)?));
    } else {
        for line in summary_lines(&summary) {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Pre-formatted summary lines for text output.
fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let elapsed = std::time::Duration::from_secs_f64(summary.elapsed_secs);
    vec![
        format!("Finished at {}", summary.timestamp_utc),
        format!(
            "Snapshots: {} of {} expected (tmax = {})",
            summary.snapshots, summary.params.nshot, summary.params.tmax
        ),
        format!("Results in {}", summary.results_dir.display()),
        format!("Parameter copies in {}", summary.params_dir.display()),
        format!("Time elapsed = {}", humantime::format_duration(elapsed)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DecompositionPlan, SimulationParams};

    #[test]
    fn config_carries_cli_arguments_through() {
        let args = Cli::parse_from(["grmhd-run", "3", "8", "--launcher", "mpirun"]);
        let cfg = build_config(&args);
        assert_eq!(cfg.dimensionality, 3);
        assert_eq!(cfg.requested_cores, 8);
        assert_eq!(cfg.launcher, "mpirun");
        assert_eq!(cfg.param_file, PathBuf::from("pram.f90"));
    }

    #[test]
    fn summary_text_names_the_artifacts() {
        let summary = RunSummary {
            timestamp_utc: "2025-01-01T00:00:00Z".into(),
            plan: DecompositionPlan {
                ni: 2,
                nj: 2,
                nk: 2,
                actual_cores: 8,
            },
            params: SimulationParams {
                tmax: 10.0,
                nshot: 40,
            },
            snapshots: 40,
            results_dir: PathBuf::from("results"),
            params_dir: PathBuf::from("params"),
            elapsed_secs: 90.0,
        };
        let lines = summary_lines(&summary);
        assert!(lines.iter().any(|l| l.contains("Snapshots: 40 of 40")));
        assert!(lines.iter().any(|l| l.contains("Results in results")));
        assert!(lines.iter().any(|l| l.contains("1m 30s")));
    }

    #[test]
    fn sub_second_elapsed_time_is_not_truncated() {
        let summary = RunSummary {
            timestamp_utc: "2025-01-01T00:00:00Z".into(),
            plan: DecompositionPlan {
                ni: 1,
                nj: 1,
                nk: 1,
                actual_cores: 1,
            },
            params: SimulationParams {
                tmax: 1.0,
                nshot: 1,
            },
            snapshots: 1,
            results_dir: PathBuf::from("results"),
            params_dir: PathBuf::from("params"),
            elapsed_secs: 0.9,
        };
        let lines = summary_lines(&summary);
        assert!(lines.iter().any(|l| l.contains("900ms")));
        assert!(!lines.iter().any(|l| l.ends_with("= 0s")));
    }

    #[test]
    fn banner_goes_to_stdout() {
        let lines: Vec<OutputLine> = banner_lines().collect();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| matches!(l, OutputLine::Stdout(_))));
        assert!(lines
            .iter()
            .any(|l| matches!(l, OutputLine::Stdout(s) if s.contains("RAISHIN"))));
    }

    #[test]
    fn zero_cores_is_rejected_at_the_argument_surface() {
        assert!(Cli::try_parse_from(["grmhd-run", "2", "0"]).is_err());
        assert!(Cli::try_parse_from(["grmhd-run", "2", "4"]).is_ok());
    }
}
