//! Whole Test Suite: a population of test suites evolved with tournament
//! selection, single-point crossover and elitism.
//!
//! A suite's fitness is the best value any of its tests reaches on each
//! target. Every evaluated test also goes through the archive, which is
//! where the final solution comes from.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use evorest_core::{Randomness, TargetId};

use crate::error::SearchError;
use crate::evaluated::EvaluatedIndividual;
use crate::search::SearchContext;

use super::SearchAlgorithm;

/// Best suites copied unchanged into the next generation.
const ELITES: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub tests: Vec<EvaluatedIndividual>,
}

impl Suite {
    pub fn coverage(&self) -> BTreeMap<TargetId, f64> {
        let mut out: BTreeMap<TargetId, f64> = BTreeMap::new();
        for ei in &self.tests {
            for (t, h) in ei.fitness.view() {
                let best = out.entry(t).or_insert(0.0);
                *best = best.max(h.value);
            }
        }
        out
    }

    pub fn score(&self) -> f64 {
        self.coverage().values().sum()
    }

    /// Total number of main actions.
    pub fn size(&self) -> usize {
        self.tests.iter().map(|ei| ei.individual.size()).sum()
    }

    /// Higher score first, then fewer actions.
    pub fn compare(&self, other: &Suite) -> Ordering {
        self.score()
            .partial_cmp(&other.score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.size().cmp(&self.size()))
    }
}

/// Swaps the tests at positions `0..=k` of `x` and `y`, for a random `k`
/// within the shorter suite.
pub fn crossover(x: &mut Suite, y: &mut Suite, rng: &mut Randomness) {
    let shortest = x.tests.len().min(y.tests.len());
    if shortest == 0 {
        return;
    }
    let split = rng.next_index(shortest);
    for i in 0..=split {
        std::mem::swap(&mut x.tests[i], &mut y.tests[i]);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Wts {
    population: Vec<Suite>,
}

impl Wts {
    fn sample_suite(&self, ctx: &mut SearchContext) -> Result<Suite, SearchError> {
        let n = ctx.rng.next_int(1, ctx.config.max_search_suite_size as i64) as usize;
        let mut suite = Suite::default();
        for _ in 0..n {
            if !ctx.time.should_continue_search() {
                break;
            }
            if let Some(ei) = ctx.sample_and_archive()? {
                suite.tests.push(ei);
            }
        }
        Ok(suite)
    }

    fn tournament(&self, rng: &mut Randomness, size: usize) -> usize {
        let indices: Vec<usize> = (0..self.population.len()).collect();
        rng.choose_n(&indices, size.max(1))
            .into_iter()
            .max_by(|a, b| self.population[*a].compare(&self.population[*b]))
            .unwrap_or(0)
    }

    fn mutate_suite(&self, ctx: &mut SearchContext, suite: &mut Suite) -> Result<(), SearchError> {
        let n = suite.tests.len();
        let probability = 1.0 / n.max(1) as f64;
        for i in 0..n {
            if !ctx.time.should_continue_search() {
                return Ok(());
            }
            if !ctx.rng.next_bool(probability) {
                continue;
            }
            if let Some(mutated) = ctx.mutate_once(&suite.tests[i])? {
                ctx.save_to_archive(mutated.clone());
                suite.tests[i] = mutated;
            }
        }

        if ctx.time.should_continue_search() && ctx.rng.next_bool(ctx.config.structure_mutation_probability) {
            if ctx.rng.coin() && suite.tests.len() < ctx.config.max_search_suite_size {
                if let Some(ei) = ctx.sample_and_archive()? {
                    suite.tests.push(ei);
                }
            } else if suite.tests.len() > 1 {
                let at = ctx.rng.next_index(suite.tests.len());
                suite.tests.remove(at);
            }
        }
        Ok(())
    }
}

impl SearchAlgorithm for Wts {
    fn name(&self) -> &'static str {
        "WTS"
    }

    fn setup(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        for _ in 0..ctx.config.population_size {
            if !ctx.time.should_continue_search() {
                break;
            }
            let suite = self.sample_suite(ctx)?;
            if !suite.tests.is_empty() {
                self.population.push(suite);
            }
        }
        Ok(())
    }

    fn search_once(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        if self.population.is_empty() {
            return self.setup(ctx);
        }
        let size = ctx.config.population_size.max(1);
        self.population.sort_by(|a, b| b.compare(a));

        let elites = ELITES.min(size - 1);
        let mut next: Vec<Suite> = self.population.iter().take(elites).cloned().collect();
        while next.len() < size && ctx.time.should_continue_search() {
            let mut x = self.population[self.tournament(&mut ctx.rng, ctx.config.tournament_size)].clone();
            let mut y = self.population[self.tournament(&mut ctx.rng, ctx.config.tournament_size)].clone();
            if ctx.rng.next_bool(ctx.config.xover_probability) {
                crossover(&mut x, &mut y, &mut ctx.rng);
            }
            self.mutate_suite(ctx, &mut x)?;
            self.mutate_suite(ctx, &mut y)?;
            next.push(x);
            if next.len() < size {
                next.push(y);
            }
        }
        self.population = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness_value::FitnessValue;
    use evorest_core::{Individual, SampleType};

    fn test_with(values: &[(i32, f64)]) -> EvaluatedIndividual {
        let mut fv = FitnessValue::new(1.0);
        for (t, v) in values {
            fv.update_target(TargetId(*t), *v, Some(0));
        }
        EvaluatedIndividual::new(Individual::new(Vec::new(), SampleType::Random), fv, Vec::new())
    }

    #[test]
    fn test_suite_takes_best_value_per_target() {
        let suite = Suite {
            tests: vec![test_with(&[(1, 0.5), (2, 1.0)]), test_with(&[(1, 0.8)])],
        };
        let coverage = suite.coverage();
        assert_eq!(coverage[&TargetId(1)], 0.8);
        assert_eq!(coverage[&TargetId(2)], 1.0);
        assert!((suite.score() - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_compare_prefers_higher_score() {
        let better = Suite {
            tests: vec![test_with(&[(1, 1.0)])],
        };
        let worse = Suite {
            tests: vec![test_with(&[(1, 0.2)])],
        };
        assert_eq!(better.compare(&worse), Ordering::Greater);
        assert_eq!(worse.compare(&better), Ordering::Less);
    }

    #[test]
    fn test_crossover_swaps_a_prefix() {
        let a = test_with(&[(1, 1.0)]);
        let b = test_with(&[(2, 1.0)]);
        let mut x = Suite {
            tests: vec![a.clone(), a.clone()],
        };
        let mut y = Suite { tests: vec![b.clone()] };
        let mut rng = Randomness::seeded(1);
        crossover(&mut x, &mut y, &mut rng);
        assert_eq!(x.tests[0].id(), b.id());
        assert_eq!(x.tests[1].id(), a.id());
        assert_eq!(y.tests[0].id(), a.id());
    }
}
