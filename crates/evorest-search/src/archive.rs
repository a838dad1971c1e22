//! Per-target archive of the best individuals found so far.
//!
//! Each target owns a population capped at the archive target limit (which
//! shrinks towards 1 as the search becomes focused). A target is covered once
//! an individual reaches [`MAX_VALUE`] on it; from then on its population is
//! that single individual, replaced only by a better one (shorter, or better
//! on the secondary objectives). An individual stored under several targets
//! is shared through `Rc`, never duplicated.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use evorest_core::{AdaptiveControl, IndividualId, Randomness, TargetId};

use crate::config::{FeedbackDirectedSampling, SearchConfig, SecondaryObjectiveStrategy};
use crate::evaluated::EvaluatedIndividual;
use crate::fitness_value::{FitnessValue, MAX_VALUE};
use crate::solution::Solution;

#[derive(Debug, Clone)]
pub struct Archive {
    populations: BTreeMap<TargetId, Vec<Rc<EvaluatedIndividual>>>,
    sampling_counter: HashMap<TargetId, u32>,
    last_improvement: HashMap<TargetId, u64>,
    target_limit: usize,
    feedback: FeedbackDirectedSampling,
    strategy: SecondaryObjectiveStrategy,
    bloat_control: bool,
}

impl Archive {
    pub fn new(config: &SearchConfig) -> Self {
        Archive {
            populations: BTreeMap::new(),
            sampling_counter: HashMap::new(),
            last_improvement: HashMap::new(),
            target_limit: config.archive_target_limit.max(1),
            feedback: config.feedback_directed_sampling,
            strategy: config.secondary_objective_strategy,
            bloat_control: config.bloat_control_for_secondary_objective,
        }
    }

    /// Per-target limit at the current point of the search.
    pub fn current_limit(&self, apc: &AdaptiveControl) -> usize {
        apc.exploratory_int(self.target_limit as i64, 1).max(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.populations.values().all(Vec::is_empty)
    }

    pub fn is_covered(&self, target: TargetId) -> bool {
        self.populations
            .get(&target)
            .and_then(|p| p.first())
            .is_some_and(|ei| ei.fitness.does_cover(target))
    }

    /// Reached targets without a covering individual.
    pub fn not_covered_targets(&self) -> Vec<TargetId> {
        self.populations
            .iter()
            .filter(|(t, p)| !p.is_empty() && !self.is_covered(**t))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.populations
            .keys()
            .filter(|t| self.is_covered(**t))
            .copied()
            .collect()
    }

    pub fn number_of_covered_targets(&self) -> usize {
        self.covered_targets().len()
    }

    pub fn number_of_reached_targets(&self) -> usize {
        self.populations.values().filter(|p| !p.is_empty()).count()
    }

    pub fn population(&self, target: TargetId) -> &[Rc<EvaluatedIndividual>] {
        self.populations.get(&target).map_or(&[], Vec::as_slice)
    }

    /// Best value recorded for `target`, 0 if never reached.
    pub fn best_value(&self, target: TargetId) -> f64 {
        self.population(target)
            .first()
            .map_or(0.0, |ei| ei.fitness.value(target))
    }

    /// Distinct individuals currently stored.
    pub fn individuals(&self) -> Vec<Rc<EvaluatedIndividual>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for ei in self.populations.values().flatten() {
            if seen.insert(ei.id()) {
                out.push(Rc::clone(ei));
            }
        }
        out
    }

    /// Whether `ei` reaches a target the archive has never seen.
    pub fn would_reach_new_target(&self, ei: &EvaluatedIndividual) -> bool {
        ei.fitness
            .view()
            .filter(|(_, h)| h.value > 0.0)
            .any(|(t, _)| self.population(t).is_empty())
    }

    /// Stores `ei` under every target it reaches where it improves the
    /// population. Returns whether it was stored anywhere.
    pub fn add_if_needed(&mut self, ei: EvaluatedIndividual, apc: &AdaptiveControl, now: u64) -> bool {
        let shared = Rc::new(ei);
        let reached: Vec<(TargetId, f64)> = shared
            .fitness
            .view()
            .filter(|(_, h)| h.value > 0.0)
            .map(|(t, h)| (t, h.value))
            .collect();
        let mut added = false;
        for (target, value) in reached {
            added |= self.add_if_improved_or_new(Rc::clone(&shared), target, value, apc, now);
        }
        added
    }

    /// Inserts `ei` into the population of `target` if there is room, or if
    /// it is better than the worst individual kept (which is then evicted).
    pub fn add_if_improved_or_new(
        &mut self,
        ei: Rc<EvaluatedIndividual>,
        target: TargetId,
        value: f64,
        apc: &AdaptiveControl,
        now: u64,
    ) -> bool {
        if value <= 0.0 {
            return false;
        }
        let limit = self.current_limit(apc);
        let previous_best = self.best_value(target);
        let covered = self.is_covered(target);
        let (strategy, bloat) = (self.strategy, self.bloat_control);
        let population = self.populations.entry(target).or_default();

        if covered {
            let Some(current) = population.first() else {
                return false;
            };
            if value < MAX_VALUE || !is_better(&ei, current, target, strategy, bloat) {
                return false;
            }
            population[0] = ei;
            return true;
        }

        if value >= MAX_VALUE {
            population.clear();
            population.push(ei);
            self.sampling_counter.insert(target, 0);
            self.last_improvement.insert(target, now);
            return true;
        }

        // shrink first, the limit decreases during the focused phase
        sort_best_first(population, target, strategy, bloat);
        population.truncate(limit);

        if population.len() == limit {
            let Some(worst) = population.last() else {
                return false;
            };
            if !is_better(&ei, worst, target, strategy, bloat) {
                return false;
            }
            population.pop();
        }
        population.push(ei);
        sort_best_first(population, target, strategy, bloat);

        if value > previous_best {
            self.sampling_counter.insert(target, 0);
            self.last_improvement.insert(target, now);
        }
        true
    }

    /// Copy of an archived individual, chosen through a target.
    ///
    /// Open targets are preferred over covered ones; among them the target
    /// is picked according to the feedback-directed sampling mode.
    pub fn sample_individual(&mut self, rng: &mut Randomness) -> Option<EvaluatedIndividual> {
        let mut candidates = self.not_covered_targets();
        if candidates.is_empty() {
            candidates = self
                .populations
                .iter()
                .filter(|(_, p)| !p.is_empty())
                .map(|(t, _)| *t)
                .collect();
        }
        let target = self.choose_target(&candidates, rng)?;
        *self.sampling_counter.entry(target).or_insert(0) += 1;
        let chosen = rng.choose(self.population(target))?;
        Some(EvaluatedIndividual::clone(chosen))
    }

    fn choose_target(&self, candidates: &[TargetId], rng: &mut Randomness) -> Option<TargetId> {
        match self.feedback {
            FeedbackDirectedSampling::None => rng.choose(candidates).copied(),
            FeedbackDirectedSampling::Last => {
                let counter = |t: &TargetId| self.sampling_counter.get(t).copied().unwrap_or(0);
                let min = candidates.iter().map(counter).min()?;
                let least: Vec<TargetId> = candidates
                    .iter()
                    .filter(|t| counter(t) == min)
                    .copied()
                    .collect();
                rng.choose(&least).copied()
            }
            FeedbackDirectedSampling::FocusedQuickest => {
                let improved = |t: &TargetId| self.last_improvement.get(t).copied().unwrap_or(0);
                let max = candidates.iter().map(improved).max()?;
                let quickest: Vec<TargetId> = candidates
                    .iter()
                    .filter(|t| improved(t) == max)
                    .copied()
                    .collect();
                rng.choose(&quickest).copied()
            }
        }
    }

    /// Smallest set of archived individuals covering every covered target.
    pub fn extract_solution(&self) -> Solution {
        let covered = self.covered_targets();
        let mut candidates: Vec<Rc<EvaluatedIndividual>> = Vec::new();
        for t in &covered {
            if let Some(ei) = self.population(*t).first() {
                if !candidates.iter().any(|c| c.id() == ei.id()) {
                    candidates.push(Rc::clone(ei));
                }
            }
        }

        let mut open: BTreeSet<TargetId> = covered.iter().copied().collect();
        let mut chosen: Vec<Rc<EvaluatedIndividual>> = Vec::new();
        let mut used: BTreeSet<IndividualId> = BTreeSet::new();
        while !open.is_empty() {
            let best = candidates
                .iter()
                .filter(|c| !used.contains(&c.id()))
                .map(|c| {
                    let gain = open.iter().filter(|t| c.fitness.does_cover(**t)).count();
                    (gain, c)
                })
                .filter(|(gain, _)| *gain > 0)
                .max_by(|(ga, a), (gb, b)| {
                    ga.cmp(gb)
                        .then_with(|| b.individual.size().cmp(&a.individual.size()))
                });
            let Some((_, best)) = best else {
                break;
            };
            open.retain(|t| !best.fitness.does_cover(*t));
            used.insert(best.id());
            chosen.push(Rc::clone(best));
        }

        let mut overall = FitnessValue::new(0.0);
        for t in &covered {
            overall.update_target(*t, MAX_VALUE, None);
        }
        for t in self.not_covered_targets() {
            overall.update_target(t, self.best_value(t), None);
        }
        Solution::new(
            overall,
            chosen.iter().map(|ei| EvaluatedIndividual::clone(ei)).collect(),
        )
    }
}

fn is_better(
    a: &EvaluatedIndividual,
    b: &EvaluatedIndividual,
    target: TargetId,
    strategy: SecondaryObjectiveStrategy,
    bloat: bool,
) -> bool {
    compare_on(a, b, target, strategy, bloat) == Ordering::Greater
}

/// `Greater` when `a` is better than `b` on `target`.
fn compare_on(
    a: &EvaluatedIndividual,
    b: &EvaluatedIndividual,
    target: TargetId,
    strategy: SecondaryObjectiveStrategy,
    bloat: bool,
) -> Ordering {
    a.fitness
        .value(target)
        .partial_cmp(&b.fitness.value(target))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.fitness.compare_secondary(&b.fitness, strategy, bloat))
}

fn sort_best_first(
    population: &mut [Rc<EvaluatedIndividual>],
    target: TargetId,
    strategy: SecondaryObjectiveStrategy,
    bloat: bool,
) {
    population.sort_by(|a, b| compare_on(b, a, target, strategy, bloat));
}

#[cfg(test)]
mod tests {
    use super::*;
    use evorest_core::{Individual, SampleType};
    use proptest::prelude::*;

    fn evaluated(targets: &[(i32, f64)]) -> EvaluatedIndividual {
        let mut fv = FitnessValue::new(1.0);
        for (t, v) in targets {
            fv.update_target(TargetId(*t), *v, Some(0));
        }
        EvaluatedIndividual::new(Individual::new(Vec::new(), SampleType::Random), fv, Vec::new())
    }

    fn archive(limit: usize) -> Archive {
        let mut config = SearchConfig::default();
        config.archive_target_limit = limit;
        Archive::new(&config)
    }

    #[test]
    fn test_limit_one_keeps_the_better_individual() {
        let mut archive = archive(1);
        let apc = AdaptiveControl::default();
        let first = evaluated(&[(7, 0.5)]);
        let second = evaluated(&[(7, 0.9)]);
        let second_id = second.id();
        assert!(archive.add_if_needed(first, &apc, 1));
        assert!(archive.add_if_needed(second, &apc, 2));
        let population = archive.population(TargetId(7));
        assert_eq!(population.len(), 1);
        assert_eq!(population[0].id(), second_id);
        assert_eq!(archive.best_value(TargetId(7)), 0.9);
    }

    #[test]
    fn test_covering_individual_replaces_population() {
        let mut archive = archive(5);
        let apc = AdaptiveControl::default();
        archive.add_if_needed(evaluated(&[(1, 0.3)]), &apc, 1);
        archive.add_if_needed(evaluated(&[(1, 0.4)]), &apc, 2);
        assert_eq!(archive.population(TargetId(1)).len(), 2);
        assert_eq!(archive.not_covered_targets(), vec![TargetId(1)]);

        archive.add_if_needed(evaluated(&[(1, 1.0)]), &apc, 3);
        assert_eq!(archive.population(TargetId(1)).len(), 1);
        assert!(archive.is_covered(TargetId(1)));
        assert!(archive.not_covered_targets().is_empty());

        // a non-covering individual never enters a covered target
        assert!(!archive.add_if_needed(evaluated(&[(1, 0.99)]), &apc, 4));
    }

    #[test]
    fn test_shared_individual_under_many_targets() {
        let mut archive = archive(3);
        let apc = AdaptiveControl::default();
        archive.add_if_needed(evaluated(&[(1, 1.0), (2, 1.0), (3, 0.2)]), &apc, 1);
        let a = &archive.population(TargetId(1))[0];
        let b = &archive.population(TargetId(2))[0];
        assert!(Rc::ptr_eq(a, b));
        assert_eq!(archive.individuals().len(), 1);
        assert_eq!(archive.number_of_reached_targets(), 3);
    }

    #[test]
    fn test_would_reach_new_target() {
        let mut archive = archive(3);
        let apc = AdaptiveControl::default();
        archive.add_if_needed(evaluated(&[(1, 0.5)]), &apc, 1);
        assert!(!archive.would_reach_new_target(&evaluated(&[(1, 0.9)])));
        assert!(archive.would_reach_new_target(&evaluated(&[(2, 0.1)])));
    }

    #[test]
    fn test_focused_phase_shrinks_population() {
        let mut archive = archive(4);
        let exploring = AdaptiveControl::new(0.0, 0.5);
        for v in [0.1, 0.2, 0.3, 0.4] {
            archive.add_if_needed(evaluated(&[(1, v)]), &exploring, 1);
        }
        assert_eq!(archive.population(TargetId(1)).len(), 4);
        let focused = AdaptiveControl::new(0.9, 0.5);
        archive.add_if_needed(evaluated(&[(1, 0.05)]), &focused, 2);
        assert_eq!(archive.population(TargetId(1)).len(), 1);
        assert_eq!(archive.best_value(TargetId(1)), 0.4);
    }

    #[test]
    fn test_sampling_prefers_open_targets() {
        let mut archive = archive(2);
        let apc = AdaptiveControl::default();
        archive.add_if_needed(evaluated(&[(1, 1.0)]), &apc, 1);
        let open = evaluated(&[(2, 0.5)]);
        let open_id = open.id();
        archive.add_if_needed(open, &apc, 2);
        let mut rng = Randomness::seeded(3);
        for _ in 0..10 {
            let sampled = archive.sample_individual(&mut rng).unwrap();
            assert_eq!(sampled.id(), open_id);
        }
    }

    #[test]
    fn test_extract_solution_is_minimal() {
        let mut archive = archive(2);
        let apc = AdaptiveControl::default();
        archive.add_if_needed(evaluated(&[(1, 1.0)]), &apc, 1);
        archive.add_if_needed(evaluated(&[(2, 1.0)]), &apc, 2);
        let both = evaluated(&[(1, 1.0), (2, 1.0), (3, 1.0)]);
        archive.add_if_needed(both, &apc, 3);
        let solution = archive.extract_solution();
        // three candidates remain, the last one alone covers everything
        assert_eq!(solution.individuals.len(), 1);
        assert_eq!(solution.overall.covered_count(), 3);
    }

    proptest! {
        #[test]
        fn prop_population_never_exceeds_limit(
            limit in 1usize..5,
            values in proptest::collection::vec(0.01f64..0.99, 1..40),
        ) {
            let mut archive = archive(limit);
            let apc = AdaptiveControl::default();
            for (i, v) in values.iter().enumerate() {
                archive.add_if_needed(evaluated(&[(1, *v)]), &apc, i as u64);
                prop_assert!(archive.population(TargetId(1)).len() <= limit);
            }
        }

        #[test]
        fn prop_worse_individual_does_not_change_full_population(
            limit in 1usize..4,
            values in proptest::collection::vec(0.5f64..0.99, 4..10),
        ) {
            let mut archive = archive(limit);
            let apc = AdaptiveControl::default();
            for v in &values {
                archive.add_if_needed(evaluated(&[(1, *v)]), &apc, 0);
            }
            let before: Vec<IndividualId> =
                archive.population(TargetId(1)).iter().map(|e| e.id()).collect();
            prop_assert_eq!(before.len(), limit);
            prop_assert!(!archive.add_if_needed(evaluated(&[(1, 0.1)]), &apc, 1));
            let after: Vec<IndividualId> =
                archive.population(TargetId(1)).iter().map(|e| e.id()).collect();
            prop_assert_eq!(before, after);
        }
    }
}
