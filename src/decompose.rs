//! Mesh splitting for MPI.
//!
//! Determines how many ranks to place along each mesh axis for a requested
//! core count. The splitting is imperfect: for 2-D and 3-D meshes the
//! rounded grid may cover fewer or more cores than requested, and the
//! product `ni * nj * nk` supersedes the request everywhere downstream.

use crate::error::RunError;
use crate::model::DecompositionPlan;

/// Compute the process grid for `requested_cores` ranks over a
/// `dimensionality`-dimensional mesh.
///
/// Dimensionalities outside 1..=3 and a zero core count are caller errors
/// and fail explicitly, so no degenerate grid ever reaches the patch or
/// launch steps.
pub fn decompose(dimensionality: u32, requested_cores: u32) -> Result<DecompositionPlan, RunError> {
    if requested_cores == 0 {
        return Err(RunError::InvalidCoreCount(0));
    }
    let n = requested_cores as f64;
    let (ni, nj, nk) = match dimensionality {
        1 => (requested_cores, 1, 1),
        2 => {
            // 2-D meshes split in i and k only.
            let ni = n.sqrt().round() as u32;
            let nk = (n / ni as f64).round() as u32;
            (ni, 1, nk)
        }
        3 => {
            let ni = n.cbrt().round() as u32;
            let nj = ni;
            let nk = (n / (ni as f64 * nj as f64)).round() as u32;
            (ni, nj, nk)
        }
        other => return Err(RunError::InvalidDimension(other)),
    };
    // The rounded grid can overshoot the request; an unrepresentable
    // product means the request itself was out of range.
    let actual_cores = ni
        .checked_mul(nj)
        .and_then(|p| p.checked_mul(nk))
        .ok_or(RunError::InvalidCoreCount(requested_cores))?;
    Ok(DecompositionPlan {
        ni,
        nj,
        nk,
        actual_cores,
    })
}
