//! Post-run artifact layout.
//!
//! Once the converter has produced the VTK snapshots, the working directory
//! is partitioned: snapshot files move into `results/`, the configuration
//! sources that defined the run are copied into `params/`. Both directories
//! are created fresh; an existing one aborts the stage rather than merging.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RunError;

/// Configuration sources preserved alongside the results of every run.
pub const PARAM_FILES: [&str; 3] = ["pram.f90", "convert_vtk2dn1.f90", "mdgrmhd.f90"];

const SNAPSHOT_EXT: &str = "vtk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub results_dir: PathBuf,
    pub params_dir: PathBuf,
}

/// Archive the run's artifacts under `workdir`.
///
/// Every `*.vtk` file directly under `workdir` is moved into `results/`;
/// each file named in `param_files` is copied into `params/` with the
/// working-directory original left in place.
pub fn archive(workdir: &Path, param_files: &[&str]) -> Result<ArchiveLayout, RunError> {
    let results_dir = workdir.join("results");
    let params_dir = workdir.join("params");

    // Both checked up front so a collision on either leaves both untouched.
    for dir in [&results_dir, &params_dir] {
        if dir.exists() {
            return Err(RunError::DirectoryExists(dir.clone()));
        }
    }
    fs::create_dir(&results_dir)?;
    fs::create_dir(&params_dir)?;

    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == SNAPSHOT_EXT) {
            fs::rename(&path, results_dir.join(entry.file_name()))?;
        }
    }

    for name in param_files {
        fs::copy(workdir.join(name), params_dir.join(name))?;
    }

    Ok(ArchiveLayout {
        results_dir,
        params_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_workdir(dir: &Path) {
        for name in ["ok0000.vtk", "ok0001.vtk"] {
            fs::write(dir.join(name), b"vtk data").unwrap();
        }
        for name in PARAM_FILES {
            fs::write(dir.join(name), format!("! {name}")).unwrap();
        }
        fs::write(dir.join("run.log"), b"log").unwrap();
    }

    #[test]
    fn snapshots_move_and_params_copy() {
        let dir = TempDir::new().unwrap();
        seed_workdir(dir.path());

        let layout = archive(dir.path(), &PARAM_FILES).unwrap();

        // No snapshot files left behind in the working directory.
        let leftover: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "vtk"))
            .collect();
        assert!(leftover.is_empty());

        let mut moved: Vec<_> = fs::read_dir(&layout.results_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        moved.sort();
        assert_eq!(moved, ["ok0000.vtk", "ok0001.vtk"]);

        for name in PARAM_FILES {
            let copied = fs::read_to_string(layout.params_dir.join(name)).unwrap();
            assert_eq!(copied, format!("! {name}"));
            // Originals stay put.
            assert!(dir.path().join(name).is_file());
        }
        // Unrelated files in the working directory are not archived.
        assert!(dir.path().join("run.log").is_file());
    }

    #[test]
    fn existing_results_dir_aborts_untouched() {
        let dir = TempDir::new().unwrap();
        seed_workdir(dir.path());
        fs::create_dir(dir.path().join("results")).unwrap();
        fs::write(dir.path().join("results/keep.txt"), b"old").unwrap();

        let err = archive(dir.path(), &PARAM_FILES).unwrap_err();
        assert!(matches!(err, RunError::DirectoryExists(_)));
        // Pre-existing contents intact, params never created, nothing moved.
        assert!(dir.path().join("results/keep.txt").is_file());
        assert!(!dir.path().join("params").exists());
        assert!(dir.path().join("ok0000.vtk").is_file());
    }

    #[test]
    fn existing_params_dir_aborts_before_creating_results() {
        let dir = TempDir::new().unwrap();
        seed_workdir(dir.path());
        fs::create_dir(dir.path().join("params")).unwrap();

        let err = archive(dir.path(), &PARAM_FILES).unwrap_err();
        assert!(matches!(err, RunError::DirectoryExists(_)));
        assert!(!dir.path().join("results").exists());
    }
}
