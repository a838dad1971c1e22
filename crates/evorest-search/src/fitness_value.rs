//! Fitness of one evaluated individual.
//!
//! A [`FitnessValue`] maps every reached target to a heuristic value in
//! `[0, 1]` (1 = covered) together with the index of the action that reached
//! it. Extra heuristics reported per action (SQL distances to minimise) act
//! as secondary objectives when two individuals tie on a target.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use evorest_core::TargetId;
use serde::{Deserialize, Serialize};

use crate::config::SecondaryObjectiveStrategy;

/// Heuristic value of a covered target.
pub const MAX_VALUE: f64 = 1.0;

/// Value and producing action of one target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heuristics {
    pub value: f64,
    /// Index of the main action that reached the target, `None` if unknown.
    pub action_index: Option<usize>,
}

/// Tables and columns touched by the SQL executed during one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseExecution {
    pub queried: BTreeMap<String, BTreeSet<String>>,
    pub inserted: BTreeMap<String, BTreeSet<String>>,
    pub updated: BTreeMap<String, BTreeSet<String>>,
    pub deleted: BTreeSet<String>,
    /// Columns of WHERE clauses that matched no row.
    pub failed_where: BTreeMap<String, BTreeSet<String>>,
}

impl DatabaseExecution {
    /// Every table read or written.
    pub fn tables(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.deleted.clone();
        out.extend(self.queried.keys().cloned());
        out.extend(self.inserted.keys().cloned());
        out.extend(self.updated.keys().cloned());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.queried.is_empty()
            && self.inserted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessValue {
    /// Number of main actions of the individual (used for bloat control).
    pub size: f64,
    targets: BTreeMap<TargetId, Heuristics>,
    extra_to_minimize: BTreeMap<usize, Vec<f64>>,
    database_executions: BTreeMap<usize, DatabaseExecution>,
}

impl FitnessValue {
    pub fn new(size: f64) -> Self {
        FitnessValue {
            size,
            targets: BTreeMap::new(),
            extra_to_minimize: BTreeMap::new(),
            database_executions: BTreeMap::new(),
        }
    }

    /// Records `value` for `id` unless a better value is already known.
    ///
    /// Values are clamped to `[0, 1]`.
    pub fn update_target(&mut self, id: TargetId, value: f64, action_index: Option<usize>) {
        let value = value.clamp(0.0, MAX_VALUE);
        match self.targets.get(&id) {
            Some(current) if current.value >= value => {}
            _ => {
                self.targets.insert(
                    id,
                    Heuristics {
                        value,
                        action_index,
                    },
                );
            }
        }
    }

    /// Heuristic value of `id`, 0 when never reached.
    pub fn value(&self, id: TargetId) -> f64 {
        self.targets.get(&id).map_or(0.0, |h| h.value)
    }

    pub fn heuristics(&self, id: TargetId) -> Option<&Heuristics> {
        self.targets.get(&id)
    }

    pub fn does_cover(&self, id: TargetId) -> bool {
        self.value(id) >= MAX_VALUE
    }

    /// Every target with a non-zero value.
    pub fn view(&self) -> impl Iterator<Item = (TargetId, &Heuristics)> {
        self.targets.iter().map(|(k, v)| (*k, v))
    }

    pub fn reached_targets(&self) -> Vec<TargetId> {
        self.targets
            .iter()
            .filter(|(_, h)| h.value > 0.0)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.targets
            .iter()
            .filter(|(_, h)| h.value >= MAX_VALUE)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Targets reached by any of `actions`.
    pub fn targets_of_actions(&self, actions: &[usize]) -> BTreeMap<TargetId, Heuristics> {
        self.targets
            .iter()
            .filter(|(_, h)| h.action_index.is_some_and(|i| actions.contains(&i)))
            .map(|(k, h)| (*k, *h))
            .collect()
    }

    /// Sum of every target value.
    pub fn compute_fitness_score(&self) -> f64 {
        self.targets.values().map(|h| h.value).sum()
    }

    pub fn covered_count(&self) -> usize {
        self.targets.values().filter(|h| h.value >= MAX_VALUE).count()
    }

    // -----------------------------------------------------------------------
    // Extra heuristics
    // -----------------------------------------------------------------------

    pub fn set_extra_to_minimize(&mut self, action_index: usize, distances: Vec<f64>) {
        self.extra_to_minimize.insert(action_index, distances);
    }

    pub fn extra_to_minimize(&self, action_index: usize) -> Option<&[f64]> {
        self.extra_to_minimize.get(&action_index).map(Vec::as_slice)
    }

    pub fn set_database_execution(&mut self, action_index: usize, execution: DatabaseExecution) {
        self.database_executions.insert(action_index, execution);
    }

    pub fn database_execution(&self, action_index: usize) -> Option<&DatabaseExecution> {
        self.database_executions.get(&action_index)
    }

    pub fn database_executions(&self) -> impl Iterator<Item = (usize, &DatabaseExecution)> {
        self.database_executions.iter().map(|(k, v)| (*k, v))
    }

    fn all_extra(&self) -> impl Iterator<Item = f64> + '_ {
        self.extra_to_minimize.values().flatten().copied()
    }

    fn average_extra(&self) -> Option<f64> {
        let (sum, n) = self.all_extra().fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    /// Compares extra heuristics; `Greater` means `self` is better.
    fn compare_extra_to_minimize(
        &self,
        other: &FitnessValue,
        strategy: SecondaryObjectiveStrategy,
    ) -> Ordering {
        let lower_is_better = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        match strategy {
            SecondaryObjectiveStrategy::AvgDistance => {
                lower_is_better(self.average_extra(), other.average_extra())
            }
            SecondaryObjectiveStrategy::AvgDistanceSameNActions => {
                if self.extra_to_minimize.len() != other.extra_to_minimize.len() {
                    return Ordering::Equal;
                }
                lower_is_better(self.average_extra(), other.average_extra())
            }
            SecondaryObjectiveStrategy::BestMin => {
                let min = |f: &FitnessValue| f.all_extra().reduce(f64::min);
                lower_is_better(min(self), min(other))
            }
        }
    }

    /// Tie-breaker between equal target values; `Greater` means `self` is better.
    pub fn compare_secondary(
        &self,
        other: &FitnessValue,
        strategy: SecondaryObjectiveStrategy,
        bloat_control: bool,
    ) -> Ordering {
        let extra = self.compare_extra_to_minimize(other, strategy);
        let size = other
            .size
            .partial_cmp(&self.size)
            .unwrap_or(Ordering::Equal);
        if bloat_control {
            size.then(extra)
        } else {
            extra.then(size)
        }
    }

    /// Whether `self` is at least as good as `other` on every target of `targets`.
    pub fn subsumes(
        &self,
        other: &FitnessValue,
        targets: &[TargetId],
        strategy: SecondaryObjectiveStrategy,
        bloat_control: bool,
    ) -> bool {
        for &t in targets {
            let v = self.value(t);
            let z = other.value(t);
            if v < z {
                return false;
            }
            if v == z && self.compare_secondary(other, strategy, bloat_control) == Ordering::Less {
                return false;
            }
        }
        true
    }

    /// Whether `self` reaches some target better than `other` does.
    pub fn reach_more_than(&self, other: &FitnessValue) -> bool {
        self.targets.iter().any(|(k, h)| h.value > other.value(*k))
    }
}
