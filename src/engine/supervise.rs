//! Launch and supervision of the MPI simulation process.
//!
//! The child runs for a long, a-priori-unknown time and produces unbounded
//! output, so stdout is consumed incrementally while it runs: each line is
//! echoed verbatim to `run.log`, classified, and turned into progress or
//! snapshot events. stderr accumulates in `errors.log` on its own, with no
//! ordering guarantee relative to stdout. End of the stdout stream is what
//! ends the stage.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

use crate::error::RunError;
use crate::model::{InfoEvent, RunEvent, SnapshotRecord};
use crate::parse::{self, ParsedLine};
use crate::progress::ProgressTracker;

/// Cancellation signal observed between reads of the output stream.
pub struct CancelSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    async fn triggered(&self) {
        loop {
            // Register interest before checking the flag so a trigger
            // between the check and the await is not missed.
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// Run-scoped state: the run/time log sinks plus the snapshot counter.
///
/// Owned exclusively by the supervise stage; dropping it closes the handles
/// on every exit path, including cancellation.
struct RunLogs {
    run: LineWriter<File>,
    time: LineWriter<File>,
    snapshots: u32,
}

impl RunLogs {
    /// Open `run.log` and `time.log` for the consumer and `errors.log` for
    /// the child's stderr.
    fn open(workdir: &Path) -> Result<(Self, File), RunError> {
        let run = LineWriter::new(File::create(workdir.join("run.log"))?);
        let time = LineWriter::new(File::create(workdir.join("time.log"))?);
        let errors = File::create(workdir.join("errors.log"))?;
        Ok((
            Self {
                run,
                time,
                snapshots: 0,
            },
            errors,
        ))
    }

    fn flush(&mut self) -> Result<(), RunError> {
        self.run.flush()?;
        self.time.flush()?;
        Ok(())
    }
}

/// Launch the simulation under `cores`-way MPI parallelism and consume its
/// output until the stream closes. Returns the number of snapshots seen.
pub async fn run_simulation(
    workdir: &Path,
    launcher: &str,
    binary: &str,
    cores: u32,
    tmax: f64,
    event_tx: &UnboundedSender<RunEvent>,
    cancel: &CancelSignal,
) -> Result<u32, RunError> {
    let (logs, errors) = RunLogs::open(workdir)?;

    let mut child = Command::new(launcher)
        .arg("-n")
        .arg(cores.to_string())
        .arg(binary)
        .current_dir(workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::from(errors))
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;

    match consume_output(BufReader::new(stdout), logs, tmax, event_tx, cancel).await {
        Ok(snapshots) => {
            // Reap the child; completion was already decided by stream EOF
            // and the exit status is not part of the contract.
            let _ = child.wait().await;
            Ok(snapshots)
        }
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

/// Blocking-equivalent line loop over the child's stdout.
///
/// Generic over the reader so tests can drive a scripted stream without
/// spawning a process. Partial logs are flushed before a cancellation or
/// error is surfaced.
async fn consume_output<R: AsyncBufRead + Unpin>(
    mut reader: R,
    mut logs: RunLogs,
    tmax: f64,
    event_tx: &UnboundedSender<RunEvent>,
    cancel: &CancelSignal,
) -> Result<u32, RunError> {
    let mut tracker = ProgressTracker::new(tmax);
    let mut raw = String::new();
    loop {
        raw.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut raw) => read?,
            _ = cancel.triggered() => {
                logs.flush()?;
                return Err(RunError::Cancelled);
            }
        };
        if read == 0 {
            break;
        }
        // Verbatim echo first; classification never gates the run log.
        logs.run.write_all(raw.as_bytes())?;

        let line = raw.trim_end_matches(['\n', '\r']);
        match parse::classify(line) {
            Ok(ParsedLine::Snapshot { sim_time }) => {
                let record = SnapshotRecord {
                    index: logs.snapshots,
                    sim_time,
                };
                writeln!(logs.time, "{}\t{}", record.index, record.sim_time)?;
                logs.snapshots += 1;
                let fraction = tracker.update(sim_time);
                let _ = event_tx.send(RunEvent::Snapshot { record });
                let _ = event_tx.send(RunEvent::Progress { sim_time, fraction });
            }
            Ok(ParsedLine::Progress { sim_time }) => {
                let fraction = tracker.update(sim_time);
                let _ = event_tx.send(RunEvent::Progress { sim_time, fraction });
            }
            Ok(ParsedLine::Plain) => {}
            Err(_) => {
                // Event dropped, run continues; the raw line is already in
                // the run log.
                let _ = event_tx.send(RunEvent::Info(InfoEvent::MalformedLogLine {
                    line: line.to_string(),
                }));
            }
        }
    }
    logs.flush()?;
    Ok(logs.snapshots)
}
