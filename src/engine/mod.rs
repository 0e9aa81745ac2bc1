//! Run engine: sequences the pipeline stages and reports events.
//!
//! Stages execute strictly sequentially; nothing overlaps. The engine owns
//! no UI concerns: it emits `RunEvent`s over an unbounded channel and the
//! CLI layer decides how to render them.

mod build;
mod supervise;

use tokio::sync::mpsc;

use crate::archive;
use crate::decompose::decompose;
use crate::error::{RunError, StageError};
use crate::model::{InfoEvent, RunConfig, RunEvent, RunSummary, Stage};
use crate::patch;
use supervise::CancelSignal;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Cancel the run: the child process is killed and partial logs kept.
    Cancel,
}

pub struct SimulationEngine {
    cfg: RunConfig,
}

impl SimulationEngine {
    pub fn new(cfg: RunConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<RunEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunSummary, StageError> {
        let started = std::time::Instant::now();
        let cancel = CancelSignal::new();

        // Control listener: translates Cancel commands into the signal the
        // output loop selects on between reads.
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Cancel => {
                        cancel2.trigger();
                        break;
                    }
                }
            }
        });

        let res = self.run_stages(&event_tx, &cancel, started).await;

        // Dropping the JoinHandle would leave the task alive and waiting on
        // control_rx; abort it explicitly.
        control_handle.abort();

        if let Ok(summary) = &res {
            let _ = event_tx.send(RunEvent::RunCompleted {
                summary: Box::new(summary.clone()),
            });
        }
        res
    }

    async fn run_stages(
        &self,
        event_tx: &mpsc::UnboundedSender<RunEvent>,
        cancel: &CancelSignal,
        started: std::time::Instant,
    ) -> Result<RunSummary, StageError> {
        let cfg = &self.cfg;
        let workdir = cfg.workdir.as_path();
        let enter = |stage: Stage| -> Result<Stage, StageError> {
            // A cancel that lands between stages stops the pipeline at the
            // next boundary.
            if cancel.is_triggered() {
                return Err(RunError::Cancelled.in_stage(stage));
            }
            let _ = event_tx.send(RunEvent::StageStarted { stage });
            Ok(stage)
        };

        let stage = enter(Stage::Decompose)?;
        let plan = decompose(cfg.dimensionality, cfg.requested_cores)
            .map_err(|e| e.in_stage(stage))?;
        let _ = event_tx.send(RunEvent::PlanComputed { plan });

        let stage = enter(Stage::Patch)?;
        let params = patch::patch_param_file(&workdir.join(&cfg.param_file), &plan)
            .map_err(|e| e.in_stage(stage))?;
        patch::patch_convert_file(&workdir.join(&cfg.convert_file), params.nshot)
            .map_err(|e| e.in_stage(stage))?;
        let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(
            "Updated parameter files".into(),
        )));

        let stage = enter(Stage::BuildSimulation)?;
        build::remove_stale_outputs(workdir).map_err(|e| e.in_stage(stage))?;
        build::run_build(workdir, &cfg.simulation_makefile, "make.log")
            .await
            .map_err(|e| e.in_stage(stage))?;

        let stage = enter(Stage::Simulate)?;
        let _ = event_tx.send(RunEvent::Info(InfoEvent::LaunchingSimulation {
            cores: plan.actual_cores,
        }));
        let snapshots = supervise::run_simulation(
            workdir,
            &cfg.launcher,
            &cfg.simulation_binary,
            plan.actual_cores,
            params.tmax,
            event_tx,
            cancel,
        )
        .await
        .map_err(|e| e.in_stage(stage))?;

        let stage = enter(Stage::BuildConverter)?;
        build::run_build(workdir, &cfg.converter_makefile, "make_vtk.log")
            .await
            .map_err(|e| e.in_stage(stage))?;

        let stage = enter(Stage::Convert)?;
        // The converter's exit status is not validated, matching the
        // simulation contract; only a failed spawn is surfaced.
        let _ = tokio::process::Command::new(&cfg.converter_binary)
            .current_dir(workdir)
            .status()
            .await
            .map_err(|e| RunError::from(e).in_stage(stage))?;

        let stage = enter(Stage::Archive)?;
        let layout =
            archive::archive(workdir, &archive::PARAM_FILES).map_err(|e| e.in_stage(stage))?;

        Ok(RunSummary {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            plan,
            params,
            snapshots,
            results_dir: layout.results_dir,
            params_dir: layout.params_dir,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}
