//! Transactional rewriting of the generated Fortran configuration sources.
//!
//! The original file is copied aside to `<name>.bak` first, then streamed
//! back line by line: the first matching rule replaces a line, everything
//! else is copied through byte-for-byte. Scalar parameters (`tmax`,
//! `nshot`) are scanned out of the same pass, independently of which rule
//! (if any) replaced the line.

use regex::Regex;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::RunError;
use crate::model::{DecompositionPlan, SimulationParams};

/// A single line-replacement rule: any line containing `needle` is replaced
/// wholesale by `replacement`. At most one rule fires per line.
pub struct PatchRule {
    needle: &'static str,
    replacement: String,
}

impl PatchRule {
    pub fn new(needle: &'static str, replacement: String) -> Self {
        Self { needle, replacement }
    }

    fn matches(&self, line: &str) -> bool {
        line.contains(self.needle)
    }
}

/// Rule that pins the process grid declaration to a computed plan.
///
/// The rendered line contains `iprocs` itself, so re-patching with the same
/// plan reproduces it exactly.
pub fn grid_rule(plan: &DecompositionPlan) -> PatchRule {
    PatchRule::new(
        "iprocs",
        format!(
            "  integer, parameter :: iprocs={}, jprocs={}, kprocs={} !- CPU number in i-,j-, and  k- direction",
            plan.ni, plan.nj, plan.nk
        ),
    )
}

/// Rule that pins the converter's snapshot range to `0..=nshot`.
pub fn snapshot_range_rule(nshot: u32) -> PatchRule {
    PatchRule::new(
        "integer, parameter :: ns",
        format!(
            "  integer, parameter :: ns=0, ne={} ! start and end data file number",
            nshot
        ),
    )
}

/// Scans every original line of the parameter file for `tmax` and `nshot`.
///
/// `tmax` appears as a Fortran double literal (`10.0d0`); the `d` exponent
/// marker is normalized to `e` before parsing. Later occurrences supersede
/// earlier ones.
pub struct ScalarScan {
    tmax_re: Regex,
    nshot_re: Regex,
    tmax: Option<f64>,
    nshot: Option<u32>,
}

impl ScalarScan {
    pub fn new() -> Self {
        Self {
            tmax_re: Regex::new(r" tmax=(\d+\.\d+)d([+-]?\d+)").expect("static regex"),
            nshot_re: Regex::new(r" nshot=(\d+)").expect("static regex"),
            tmax: None,
            nshot: None,
        }
    }

    pub fn observe(&mut self, line: &str) {
        if let Some(caps) = self.tmax_re.captures(line) {
            let normalized = format!("{}e{}", &caps[1], &caps[2]);
            if let Ok(v) = normalized.parse::<f64>() {
                self.tmax = Some(v);
            }
        }
        if let Some(caps) = self.nshot_re.captures(line) {
            if let Ok(v) = caps[1].parse::<u32>() {
                self.nshot = Some(v);
            }
        }
    }

    /// Presence is validated here, at the end of the patch pass, not at the
    /// point of first use several stages later.
    pub fn finish(self, file: &Path) -> Result<SimulationParams, RunError> {
        let tmax = self.tmax.ok_or_else(|| RunError::MissingParameter {
            name: "tmax",
            file: file.to_path_buf(),
        })?;
        let nshot = self.nshot.ok_or_else(|| RunError::MissingParameter {
            name: "nshot",
            file: file.to_path_buf(),
        })?;
        Ok(SimulationParams { tmax, nshot })
    }
}

impl Default for ScalarScan {
    fn default() -> Self {
        Self::new()
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Rewrite `path` in place through its backup copy.
///
/// Every original line is fed to `observe` before any replacement decision,
/// so scalar extraction sees the file exactly as it was. Non-matching lines
/// keep their original bytes, including line terminators.
pub fn patch_file(
    path: &Path,
    rules: &[PatchRule],
    mut observe: impl FnMut(&str),
) -> Result<(), RunError> {
    if !path.is_file() {
        return Err(RunError::ConfigNotFound(path.to_path_buf()));
    }
    let backup = backup_path(path);
    if let Err(e) = fs::copy(path, &backup) {
        // A half-written backup is useless; drop it before surfacing.
        let _ = fs::remove_file(&backup);
        return Err(e.into());
    }

    let mut reader = BufReader::new(fs::File::open(&backup)?);
    let mut writer = BufWriter::new(fs::File::create(path)?);

    let mut raw = String::new();
    loop {
        raw.clear();
        if reader.read_line(&mut raw)? == 0 {
            break;
        }
        let line = raw.trim_end_matches(['\n', '\r']);
        observe(line);
        match rules.iter().find(|r| r.matches(line)) {
            Some(rule) => writeln!(writer, "{}", rule.replacement)?,
            None => writer.write_all(raw.as_bytes())?,
        }
    }
    writer.flush()?;
    Ok(())
}

/// Patch the grid declaration in the parameter file and extract the run
/// scalars in the same pass.
pub fn patch_param_file(
    path: &Path,
    plan: &DecompositionPlan,
) -> Result<SimulationParams, RunError> {
    let rules = [grid_rule(plan)];
    let mut scan = ScalarScan::new();
    patch_file(path, &rules, |line| scan.observe(line))?;
    scan.finish(path)
}

/// Patch the converter source so it processes snapshots `0..=nshot`.
pub fn patch_convert_file(path: &Path, nshot: u32) -> Result<(), RunError> {
    let rules = [snapshot_range_rule(nshot)];
    patch_file(path, &rules, |_| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRAM: &str = "\
module pram
  implicit none
  integer, parameter :: iprocs=1, jprocs=1, kprocs=1 !- CPU number in i-,j-, and  k- direction
  real(8), parameter :: tmax=12.5d0 ! terminal simulation time
  integer, parameter :: nshot=40 ! number of snapshots
end module pram
";

    const CONVERT: &str = "\
program convert
  integer, parameter :: ns=0, ne=10 ! start and end data file number
end program convert
";

    fn plan222() -> DecompositionPlan {
        DecompositionPlan {
            ni: 2,
            nj: 2,
            nk: 2,
            actual_cores: 8,
        }
    }

    #[test]
    fn grid_line_is_replaced_and_scalars_extracted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pram.f90");
        fs::write(&path, PRAM).unwrap();

        let params = patch_param_file(&path, &plan222()).unwrap();
        assert_eq!(params.tmax, 12.5);
        assert_eq!(params.nshot, 40);

        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains("iprocs=2, jprocs=2, kprocs=2"));
        assert!(!patched.contains("iprocs=1"));
        // Backup keeps the original bytes.
        let backup = fs::read_to_string(dir.path().join("pram.f90.bak")).unwrap();
        assert_eq!(backup, PRAM);
    }

    #[test]
    fn non_matching_lines_survive_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pram.f90");
        // Mixed endings and no trailing newline on the last line.
        let src = "module pram\r\n  integer, parameter :: iprocs=1, jprocs=1, kprocs=1\n  real(8), parameter :: tmax=1.0d0\n  integer, parameter :: nshot=5\nend module pram";
        fs::write(&path, src).unwrap();

        patch_param_file(&path, &plan222()).unwrap();
        let patched = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = patched.split_inclusive('\n').collect();
        assert_eq!(lines[0], "module pram\r\n");
        assert_eq!(lines[2], "  real(8), parameter :: tmax=1.0d0\n");
        assert_eq!(*lines.last().unwrap(), "end module pram");
    }

    #[test]
    fn patching_twice_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pram.f90");
        fs::write(&path, PRAM).unwrap();

        let plan = plan222();
        patch_param_file(&path, &plan).unwrap();
        let first = fs::read(&path).unwrap();
        patch_param_file(&path, &plan).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_nshot_fails_at_patch_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pram.f90");
        fs::write(
            &path,
            "  integer, parameter :: iprocs=1, jprocs=1, kprocs=1\n  real(8), parameter :: tmax=1.0d0\n",
        )
        .unwrap();

        let err = patch_param_file(&path, &plan222()).unwrap_err();
        assert!(matches!(
            err,
            RunError::MissingParameter { name: "nshot", .. }
        ));
    }

    #[test]
    fn missing_source_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.f90");
        let err = patch_param_file(&path, &plan222()).unwrap_err();
        assert!(matches!(err, RunError::ConfigNotFound(_)));
    }

    #[test]
    fn converter_range_takes_extracted_nshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("convert_vtk2dn1.f90");
        fs::write(&path, CONVERT).unwrap();

        patch_convert_file(&path, 40).unwrap();
        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains("ns=0, ne=40"));

        // Re-patching with the same count stays stable.
        patch_convert_file(&path, 40).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), patched);
    }

    #[test]
    fn fortran_double_exponent_is_normalized() {
        let mut scan = ScalarScan::new();
        scan.observe("  real(8), parameter :: tmax=2.5d2");
        scan.observe("  integer, parameter :: nshot=3");
        let params = scan.finish(Path::new("pram.f90")).unwrap();
        assert_eq!(params.tmax, 250.0);
    }
}
