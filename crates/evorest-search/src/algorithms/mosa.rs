//! Many-Objective Sorting Algorithm.
//!
//! A population of single tests ranked over the targets not yet covered:
//! the best test per target forms the first front, the rest is split into
//! non-dominated fronts, and crowding distance breaks ties inside a front.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use evorest_core::{Randomness, TargetId};

use crate::error::SearchError;
use crate::evaluated::EvaluatedIndividual;
use crate::search::SearchContext;

use super::SearchAlgorithm;

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Front index and crowding distance of one member of a population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rank {
    pub front: usize,
    pub crowding: f64,
}

impl Rank {
    /// Lower front first, then larger crowding distance.
    pub fn compare(&self, other: &Rank) -> Ordering {
        self.front.cmp(&other.front).then_with(|| {
            other
                .crowding
                .partial_cmp(&self.crowding)
                .unwrap_or(Ordering::Equal)
        })
    }
}

/// `a` is at least as good as `b` on every target and better on one.
pub fn dominates(a: &EvaluatedIndividual, b: &EvaluatedIndividual, targets: &[TargetId]) -> bool {
    let mut strictly = false;
    for t in targets {
        let (va, vb) = (a.fitness.value(*t), b.fitness.value(*t));
        if va < vb {
            return false;
        }
        if va > vb {
            strictly = true;
        }
    }
    strictly
}

/// Splits `population` into fronts of indices.
///
/// The first front holds, for every target, the member with the highest
/// positive value on it (fewer actions on ties). The remaining members are
/// sorted into successive non-dominated fronts.
pub fn preference_sorting(population: &[EvaluatedIndividual], targets: &[TargetId]) -> Vec<Vec<usize>> {
    let mut preferred = BTreeSet::new();
    for t in targets {
        let best = (0..population.len())
            .filter(|i| population[*i].fitness.value(*t) > 0.0)
            .max_by(|a, b| {
                let (pa, pb) = (&population[*a], &population[*b]);
                pa.fitness
                    .value(*t)
                    .partial_cmp(&pb.fitness.value(*t))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| pb.individual.size().cmp(&pa.individual.size()))
            });
        if let Some(best) = best {
            preferred.insert(best);
        }
    }

    let mut fronts = Vec::new();
    if !preferred.is_empty() {
        fronts.push(preferred.iter().copied().collect());
    }
    let mut remaining: Vec<usize> = (0..population.len()).filter(|i| !preferred.contains(i)).collect();
    while !remaining.is_empty() {
        let front: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|a| {
                !remaining
                    .iter()
                    .any(|b| b != a && dominates(&population[*b], &population[*a], targets))
            })
            .collect();
        remaining.retain(|i| !front.contains(i));
        fronts.push(front);
    }
    fronts
}

/// Crowding distance of each member of `front`, in the same order.
/// Members at either end of a target's range get an infinite distance.
pub fn crowding_distance(population: &[EvaluatedIndividual], front: &[usize], targets: &[TargetId]) -> Vec<f64> {
    let mut distance = vec![0.0; front.len()];
    if front.len() <= 2 {
        return vec![f64::INFINITY; front.len()];
    }
    for t in targets {
        let mut order: Vec<usize> = (0..front.len()).collect();
        order.sort_by(|a, b| {
            population[front[*a]]
                .fitness
                .value(*t)
                .partial_cmp(&population[front[*b]].fitness.value(*t))
                .unwrap_or(Ordering::Equal)
        });
        let value = |k: usize| population[front[order[k]]].fitness.value(*t);
        let last = order.len() - 1;
        let (min, max) = (value(0), value(last));
        distance[order[0]] = f64::INFINITY;
        distance[order[last]] = f64::INFINITY;
        if max > min {
            for k in 1..last {
                distance[order[k]] += (value(k + 1) - value(k - 1)) / (max - min);
            }
        }
    }
    distance
}

/// Rank of every member of `population`, aligned with it.
pub fn rank(population: &[EvaluatedIndividual], targets: &[TargetId]) -> Vec<Rank> {
    let mut ranks = vec![
        Rank {
            front: usize::MAX,
            crowding: 0.0,
        };
        population.len()
    ];
    for (front_index, front) in preference_sorting(population, targets).into_iter().enumerate() {
        let distances = crowding_distance(population, &front, targets);
        for (member, crowding) in front.into_iter().zip(distances) {
            ranks[member] = Rank {
                front: front_index,
                crowding,
            };
        }
    }
    ranks
}

// ---------------------------------------------------------------------------
// Algorithm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Mosa {
    population: Vec<EvaluatedIndividual>,
    ranks: Vec<Rank>,
}

impl Mosa {
    /// Targets reached by `population` that the archive has not covered yet.
    /// All reached targets once everything is covered.
    fn objectives(ctx: &SearchContext, population: &[EvaluatedIndividual]) -> Vec<TargetId> {
        let reached: BTreeSet<TargetId> = population
            .iter()
            .flat_map(|ei| ei.fitness.view().map(|(t, _)| t))
            .collect();
        let open: Vec<TargetId> = reached.iter().copied().filter(|t| !ctx.archive.is_covered(*t)).collect();
        if open.is_empty() {
            reached.into_iter().collect()
        } else {
            open
        }
    }

    fn tournament(&self, rng: &mut Randomness, size: usize) -> usize {
        let indices: Vec<usize> = (0..self.population.len()).collect();
        rng.choose_n(&indices, size.max(1))
            .into_iter()
            .min_by(|a, b| self.ranks[*a].compare(&self.ranks[*b]))
            .unwrap_or(0)
    }

    fn breed(&self, ctx: &mut SearchContext) -> Result<Vec<EvaluatedIndividual>, SearchError> {
        let size = ctx.config.population_size.max(1);
        let mut offspring = Vec::with_capacity(size);
        while offspring.len() < size && ctx.time.should_continue_search() {
            let child = if ctx.rng.next_bool(ctx.config.prob_of_random_sampling) {
                ctx.sample_and_archive()?
            } else {
                let parent = self.tournament(&mut ctx.rng, ctx.config.tournament_size);
                let mutated = ctx.mutate_once(&self.population[parent])?;
                if let Some(m) = mutated.as_ref() {
                    ctx.save_to_archive(m.clone());
                }
                mutated
            };
            offspring.extend(child);
        }
        Ok(offspring)
    }

    fn select(&mut self, ctx: &SearchContext, union: Vec<EvaluatedIndividual>) {
        let size = ctx.config.population_size.max(1);
        let targets = Self::objectives(ctx, &union);
        let ranks = rank(&union, &targets);
        let mut order: Vec<usize> = (0..union.len()).collect();
        order.sort_by(|a, b| ranks[*a].compare(&ranks[*b]));
        order.truncate(size);

        let mut slots: Vec<Option<EvaluatedIndividual>> = union.into_iter().map(Some).collect();
        self.population = order.iter().filter_map(|i| slots[*i].take()).collect();
        self.ranks = order.iter().map(|i| ranks[*i]).collect();
    }
}

impl SearchAlgorithm for Mosa {
    fn name(&self) -> &'static str {
        "MOSA"
    }

    fn setup(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        let mut initial = Vec::new();
        for _ in 0..ctx.config.population_size {
            if !ctx.time.should_continue_search() {
                break;
            }
            initial.extend(ctx.sample_and_archive()?);
        }
        self.select(ctx, initial);
        Ok(())
    }

    fn search_once(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        if self.population.is_empty() {
            return self.setup(ctx);
        }
        let offspring = self.breed(ctx)?;
        let mut union = std::mem::take(&mut self.population);
        union.extend(offspring);
        self.select(ctx, union);
        tracing::debug!(
            population = self.population.len(),
            first_front = self.ranks.iter().filter(|r| r.front == 0).count(),
            "generation done"
        );
        Ok(())
    }
}
