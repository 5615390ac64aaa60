//! Counters describing what a traffic light has done so far

use super::types::Phase;

/// Snapshot of a light's activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightStats {
    /// Number of phase changes since the light was created
    pub flips: u64,
    pub greens_published: u64,
    pub reds_published: u64,
    pub current_phase: Phase,
    /// Phase changes published but not yet taken by any consumer
    pub pending_events: usize,
}

impl LightStats {
    /// Get a summary string for display
    pub fn summary(&self) -> String {
        format!(
            "Phase: {} | Flips: {} (green {}, red {}) | Pending events: {}",
            self.current_phase,
            self.flips,
            self.greens_published,
            self.reds_published,
            self.pending_events
        )
    }
}
