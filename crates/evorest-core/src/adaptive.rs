//! Budget-driven parameter control.
//!
//! Several search parameters start "exploratory" and move linearly towards a
//! "focused" value as the search budget is consumed. Once the used budget
//! passes the focused-search threshold they stay at the focused value.

use serde::{Deserialize, Serialize};

/// Snapshot of how far the search has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveControl {
    /// Fraction of the budget used so far, in `[0, 1]`.
    pub used_budget: f64,
    /// Fraction of the budget at which the focused phase starts.
    pub focused_threshold: f64,
}

impl Default for AdaptiveControl {
    fn default() -> Self {
        AdaptiveControl {
            used_budget: 0.0,
            focused_threshold: 0.5,
        }
    }
}

impl AdaptiveControl {
    pub fn new(used_budget: f64, focused_threshold: f64) -> Self {
        AdaptiveControl {
            used_budget: used_budget.clamp(0.0, 1.0),
            focused_threshold,
        }
    }

    pub fn is_focused(&self) -> bool {
        self.used_budget >= self.focused_threshold
    }

    /// Linear interpolation between `start` and `end` over the exploratory phase.
    pub fn exploratory_f64(&self, start: f64, end: f64) -> f64 {
        if self.is_focused() || self.focused_threshold <= 0.0 {
            return end;
        }
        let scale = self.used_budget / self.focused_threshold;
        start + (end - start) * scale
    }

    /// Integer version of [`exploratory_f64`](Self::exploratory_f64), rounded to nearest.
    pub fn exploratory_int(&self, start: i64, end: i64) -> i64 {
        self.exploratory_f64(start as f64, end as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_start_value() {
        let apc = AdaptiveControl::new(0.0, 0.5);
        assert_eq!(apc.exploratory_int(1, 10), 1);
        assert_eq!(apc.exploratory_f64(0.5, 0.0), 0.5);
    }

    #[test]
    fn ramps_linearly_until_threshold() {
        let apc = AdaptiveControl::new(0.25, 0.5);
        assert!((apc.exploratory_f64(0.0, 1.0) - 0.5).abs() < 1e-9);
        assert_eq!(apc.exploratory_int(1, 11), 6);
    }

    #[test]
    fn focused_phase_uses_end_value() {
        let apc = AdaptiveControl::new(0.8, 0.5);
        assert!(apc.is_focused());
        assert_eq!(apc.exploratory_int(31, 10), 10);
    }
}
