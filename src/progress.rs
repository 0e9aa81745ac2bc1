//! Bounded progress mapping for simulation time.

/// Maps observed simulation times onto `[0, tmax]` for display.
///
/// Simulation time is expected to be non-decreasing; a tracked maximum
/// guards the indicator against the occasional out-of-order report.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    tmax: f64,
    seen_max: f64,
}

impl ProgressTracker {
    pub fn new(tmax: f64) -> Self {
        Self { tmax, seen_max: 0.0 }
    }

    /// Record a simulation-time sample and return the completed fraction,
    /// clamped to `[0, 1]`.
    pub fn update(&mut self, sim_time: f64) -> f64 {
        if sim_time > self.seen_max {
            self.seen_max = sim_time;
        }
        self.fraction()
    }

    pub fn fraction(&self) -> f64 {
        if self.tmax <= 0.0 {
            return 0.0;
        }
        (self.seen_max / self.tmax).clamp(0.0, 1.0)
    }
}
