//! External clean/build invocations.
//!
//! Both the simulation and the converter are built by copying the stage's
//! makefile variant over `Makefile` and invoking `make`, with the build
//! output captured to a per-stage log file.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::RunError;

/// Run one build step in `workdir`, capturing combined output to `log_name`.
///
/// `make clean` runs first; its exit status is ignored since stale targets
/// may not exist. A non-zero `make` exit surfaces as `BuildFailed` carrying
/// the log path.
pub async fn run_build(workdir: &Path, makefile: &Path, log_name: &str) -> Result<(), RunError> {
    tokio::fs::copy(workdir.join(makefile), workdir.join("Makefile")).await?;

    let _ = Command::new("make")
        .arg("clean")
        .current_dir(workdir)
        .status()
        .await;

    let log_path = workdir.join(log_name);
    let log = std::fs::File::create(&log_path)?;
    let log_err = log.try_clone()?;
    let status = Command::new("make")
        .current_dir(workdir)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .status()
        .await?;
    if !status.success() {
        return Err(RunError::BuildFailed {
            log: log_path,
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Remove data files left over from a previous run: per-rank restart and
/// structure dumps plus already-converted snapshots.
pub fn remove_stale_outputs(workdir: &Path) -> Result<(), RunError> {
    for entry in std::fs::read_dir(workdir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stale = ((name.starts_with("restart") || name.starts_with("struct"))
            && name.ends_with(".outdat"))
            || (name.starts_with("ok") && name.ends_with(".vtk"));
        if stale && entry.path().is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn stale_outputs_are_removed_selectively() {
        let dir = TempDir::new().unwrap();
        for name in [
            "restart001.outdat",
            "struct001_005.outdat",
            "ok0000.vtk",
            "pram.f90",
            "run.log",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        remove_stale_outputs(dir.path()).unwrap();

        assert!(!dir.path().join("restart001.outdat").exists());
        assert!(!dir.path().join("struct001_005.outdat").exists());
        assert!(!dir.path().join("ok0000.vtk").exists());
        assert!(dir.path().join("pram.f90").is_file());
        assert!(dir.path().join("run.log").is_file());
    }
}
