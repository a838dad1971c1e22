//! Mutation of individuals.
//!
//! A mutation is either structural (delegated to the structure mutators of
//! [`crate::structure`]) or a value mutation of a selected subset of genes.
//! Gene selection is one-over-N by default, or informed by the impacts
//! recorded for each gene when archive-based mutation kicks in.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use evorest_core::{AdaptiveControl, GeneFilter, GeneKind, Individual, Randomness, SampleType};

use crate::config::{ArchiveGeneSelectionMethod, GeneMutationStrategy, SearchConfig};
use crate::error::SearchError;
use crate::evaluated::{EvaluatedIndividual, GeneImpact};
use crate::resource::ResourceManager;
use crate::sampler::RestSampler;
use crate::structure::{ResourceStructureMutator, RestStructureMutator, StructureChange};

/// Selection rounds before one-over-N falls back to a single uniform pick.
const MAX_SELECTION_ROUNDS: usize = 100;

/// What gene selection needs to know about one mutable gene.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneCandidate {
    pub key: String,
    pub sql: bool,
    /// Activation probability of a disruptive gene.
    pub gate: Option<f64>,
}

/// Indices of `candidates` to mutate; never empty when `candidates` is not.
///
/// Each gene is picked with probability `1/N`. With the SQL-biased strategy,
/// SQL genes and main-action genes share the probability mass equally.
pub fn select_one_over_n(
    candidates: &[GeneCandidate],
    strategy: GeneMutationStrategy,
    rng: &mut Randomness,
) -> Vec<usize> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let n = candidates.len() as f64;
    let n_sql = candidates.iter().filter(|c| c.sql).count();
    let n_main = candidates.len() - n_sql;
    let probability = |c: &GeneCandidate| match strategy {
        GeneMutationStrategy::OneOverNBiasedSql if n_sql > 0 && n_main > 0 => {
            if c.sql {
                0.5 / n_sql as f64
            } else {
                0.5 / n_main as f64
            }
        }
        _ => 1.0 / n,
    };

    for _ in 0..MAX_SELECTION_ROUNDS {
        let selected: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| rng.next_bool(probability(c)) && c.gate.map_or(true, |p| rng.next_bool(p)))
            .map(|(i, _)| i)
            .collect();
        if !selected.is_empty() {
            return selected;
        }
    }
    vec![rng.next_index(candidates.len())]
}

/// Candidates ordered by `method`, best first, cut to the top
/// `ceil(N * share)` (at least one). Empty when `method` is `None`.
pub fn select_from_impacts(
    candidates: &[GeneCandidate],
    impacts: &BTreeMap<String, GeneImpact>,
    method: ArchiveGeneSelectionMethod,
    share: f64,
    rng: &mut Randomness,
) -> Vec<usize> {
    if candidates.is_empty() || method == ArchiveGeneSelectionMethod::None {
        return Vec::new();
    }
    let impact = |i: &usize| impacts.get(&candidates[*i].key).copied().unwrap_or_default();
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    rng.shuffle(&mut order);
    match method {
        ArchiveGeneSelectionMethod::None => {}
        ArchiveGeneSelectionMethod::AwayBad => order.sort_by_key(|i| impact(i).counter),
        ArchiveGeneSelectionMethod::ApproachGood => {
            order.sort_by_key(|i| Reverse(impact(i).times_of_impact))
        }
        ArchiveGeneSelectionMethod::FeedBack => order.sort_by_key(|i| {
            let imp = impact(i);
            (imp.times_to_manipulate > 0, imp.times_to_manipulate)
        }),
    }
    let pool = ((candidates.len() as f64 * share).ceil() as usize).clamp(1, candidates.len());
    order.truncate(pool);
    order
}

/// A mutated copy and what was done to it.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub individual: Individual,
    /// Keys of the genes whose value was mutated.
    pub mutated_genes: Vec<String>,
    pub structure: Option<StructureChange>,
}

impl Mutation {
    pub fn operator(&self) -> String {
        match self.structure {
            Some(change) => format!("structure:{}", change.label()),
            None => "gene".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mutator {
    strategy: GeneMutationStrategy,
    structure_probability: f64,
    archive_probability: f64,
    candidate_share: f64,
    selection: ArchiveGeneSelectionMethod,
    max_test_size: usize,
    mutate_sql: bool,
    rest_structure: RestStructureMutator,
    resource_structure: ResourceStructureMutator,
}

impl Mutator {
    pub fn new(config: &SearchConfig) -> Self {
        Mutator {
            strategy: config.gene_mutation_strategy,
            structure_probability: config.structure_mutation_probability,
            archive_probability: config.prob_of_archive_mutation,
            candidate_share: config.per_of_candidate_genes_to_mutate,
            selection: config.gene_selection_method,
            max_test_size: config.max_test_size,
            mutate_sql: config.generate_sql_data_with_search,
            rest_structure: RestStructureMutator::new(config.max_test_size),
            resource_structure: ResourceStructureMutator::new(config.max_test_size),
        }
    }

    /// Mutates a copy of `current`.
    ///
    /// A structural mutation is tried first with `structureMutationProbability`
    /// when the individual allows it; otherwise, or when no structural change
    /// applies, gene values are mutated. The initialization actions are
    /// repaired afterwards and must verify.
    pub fn mutate(
        &self,
        current: &EvaluatedIndividual,
        sampler: &RestSampler,
        manager: Option<&mut ResourceManager>,
        apc: &AdaptiveControl,
        rng: &mut Randomness,
    ) -> Result<Mutation, SearchError> {
        let mut individual = current.individual.offspring("mutation");

        if individual.can_mutate_structure()
            && self.max_test_size > 1
            && rng.next_bool(self.structure_probability)
        {
            let change = match manager {
                Some(m) if individual.sample_type == SampleType::SmartResource => {
                    self.resource_structure.mutate(&mut individual, m, rng)?
                }
                _ => self.rest_structure.mutate(&mut individual, sampler, rng)?,
            };
            if let Some(change) = change {
                self.finish(&mut individual, rng)?;
                return Ok(Mutation {
                    individual,
                    mutated_genes: Vec::new(),
                    structure: Some(change),
                });
            }
        }

        let mutated_genes = self.mutate_genes(&mut individual, &current.impacts, apc, rng)?;
        self.finish(&mut individual, rng)?;
        Ok(Mutation {
            individual,
            mutated_genes,
            structure: None,
        })
    }

    fn filter(&self) -> GeneFilter {
        if self.mutate_sql {
            GeneFilter::All
        } else {
            GeneFilter::NoSql
        }
    }

    /// Mutates the values of the selected genes. Returns their keys.
    pub fn mutate_genes(
        &self,
        individual: &mut Individual,
        impacts: &BTreeMap<String, GeneImpact>,
        apc: &AdaptiveControl,
        rng: &mut Randomness,
    ) -> Result<Vec<String>, SearchError> {
        let filter = self.filter();
        let n_sql = if filter == GeneFilter::All {
            individual.mutable_gene_slots(GeneFilter::OnlySql).len()
        } else {
            0
        };
        let ctx = individual.gene_context();
        let mut slots = individual.mutable_gene_slots(filter);
        // SQL slots come first
        let candidates: Vec<GeneCandidate> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| GeneCandidate {
                key: s.key.clone(),
                sql: i < n_sql,
                gate: match &s.gene.kind {
                    GeneKind::Disruptive(d) => Some(d.probability),
                    _ => None,
                },
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut selected = Vec::new();
        if rng.next_bool(self.archive_probability) {
            selected = select_from_impacts(&candidates, impacts, self.selection, self.candidate_share, rng);
        }
        if selected.is_empty() {
            selected = select_one_over_n(&candidates, self.strategy, rng);
        }

        let mut keys = Vec::with_capacity(selected.len());
        for i in selected {
            let slot = &mut slots[i];
            slot.gene.standard_mutation(rng, apc, &ctx)?;
            keys.push(slot.key.clone());
        }
        Ok(keys)
    }

    fn finish(&self, individual: &mut Individual, rng: &mut Randomness) -> Result<(), SearchError> {
        let dropped = individual.repair_initialization_actions(rng);
        if dropped > 0 {
            tracing::debug!(dropped, "initialization rows dropped by repair");
        }
        individual.verify_initialization_actions()?;
        individual.enforce_coherence()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness_value::FitnessValue;
    use evorest_core::{Action, ActionCatalog, Gene, HttpVerb, Param, ParamKind, RestCallAction, RestPath};
    use proptest::prelude::*;

    fn candidate(key: &str, sql: bool) -> GeneCandidate {
        GeneCandidate {
            key: key.to_string(),
            sql,
            gate: None,
        }
    }

    fn catalog() -> ActionCatalog {
        let path = RestPath::parse("/items/{id}");
        let get = RestCallAction::new(HttpVerb::Get, path.clone())
            .with_param(Param::new(ParamKind::Path, Gene::int64("id")))
            .with_param(Param::new(ParamKind::Query, Gene::string("q")));
        [Action::Rest(get)].into_iter().collect()
    }

    proptest! {
        #[test]
        fn one_over_n_never_selects_nothing(
            sql in proptest::collection::vec(any::<bool>(), 1..20),
            seed in any::<u64>(),
            biased in any::<bool>(),
        ) {
            let candidates: Vec<GeneCandidate> = sql
                .iter()
                .enumerate()
                .map(|(i, s)| candidate(&format!("g{}", i), *s))
                .collect();
            let strategy = if biased {
                GeneMutationStrategy::OneOverNBiasedSql
            } else {
                GeneMutationStrategy::OneOverN
            };
            let mut rng = Randomness::seeded(seed);
            let selected = select_one_over_n(&candidates, strategy, &mut rng);
            prop_assert!(!selected.is_empty());
            prop_assert!(selected.iter().all(|i| *i < candidates.len()));
        }
    }

    #[test]
    fn test_one_over_n_on_empty_list() {
        let mut rng = Randomness::seeded(1);
        assert!(select_one_over_n(&[], GeneMutationStrategy::OneOverN, &mut rng).is_empty());
    }

    #[test]
    fn test_closed_disruptive_gate_still_selects_something() {
        let mut rng = Randomness::seeded(1);
        let candidates = vec![GeneCandidate {
            key: "d".into(),
            sql: false,
            gate: Some(0.0),
        }];
        assert_eq!(
            select_one_over_n(&candidates, GeneMutationStrategy::OneOverN, &mut rng),
            vec![0]
        );
    }

    #[test]
    fn test_impact_based_selection() {
        let candidates = vec![candidate("a", false), candidate("b", false), candidate("c", false)];
        let mut impacts = BTreeMap::new();
        impacts.insert(
            "a".to_string(),
            GeneImpact {
                times_to_manipulate: 5,
                times_of_no_impact: 5,
                times_of_impact: 0,
                counter: 5,
            },
        );
        impacts.insert(
            "b".to_string(),
            GeneImpact {
                times_to_manipulate: 3,
                times_of_no_impact: 0,
                times_of_impact: 3,
                counter: 0,
            },
        );
        let mut rng = Randomness::seeded(9);
        let pick = |m, rng: &mut Randomness| select_from_impacts(&candidates, &impacts, m, 0.1, rng);
        assert_eq!(pick(ArchiveGeneSelectionMethod::ApproachGood, &mut rng), vec![1]);
        assert_eq!(pick(ArchiveGeneSelectionMethod::FeedBack, &mut rng), vec![2]);
        assert_ne!(pick(ArchiveGeneSelectionMethod::AwayBad, &mut rng), vec![0]);
        assert!(pick(ArchiveGeneSelectionMethod::None, &mut rng).is_empty());

        let all = select_from_impacts(&candidates, &impacts, ArchiveGeneSelectionMethod::FeedBack, 1.0, &mut rng);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_gene_mutation_changes_a_copy_only() {
        let mut config = SearchConfig::default();
        config.structure_mutation_probability = 0.0;
        let sampler = RestSampler::new(catalog(), &config);
        let mutator = Mutator::new(&config);
        let mut rng = Randomness::seeded(3);
        let individual = sampler.sample_random_individual(&mut rng).unwrap();
        let parent = EvaluatedIndividual::new(individual.clone(), FitnessValue::new(1.0), Vec::new());

        let mutation = mutator
            .mutate(&parent, &sampler, None, &AdaptiveControl::default(), &mut rng)
            .unwrap();
        assert!(mutation.structure.is_none());
        assert!(!mutation.mutated_genes.is_empty());
        assert_ne!(mutation.individual.id, parent.individual.id);
        assert_eq!(parent.individual, individual);
        assert_eq!(mutation.operator(), "gene");
    }

    #[test]
    fn test_structure_mutation_when_forced() {
        let mut config = SearchConfig::default();
        config.structure_mutation_probability = 1.0;
        config.max_test_size = 5;
        let sampler = RestSampler::new(catalog(), &config);
        let mutator = Mutator::new(&config);
        let mut rng = Randomness::seeded(4);
        let call = sampler.sample_random_call(&mut rng).unwrap().unwrap();
        let parent = EvaluatedIndividual::new(
            Individual::new(vec![call], SampleType::Random),
            FitnessValue::new(1.0),
            Vec::new(),
        );
        let mutation = mutator
            .mutate(&parent, &sampler, None, &AdaptiveControl::default(), &mut rng)
            .unwrap();
        // one call, room left: only ADD applies
        assert!(matches!(mutation.structure, Some(StructureChange::Add { .. })));
        assert_eq!(mutation.individual.size(), 2);
        assert_eq!(mutation.operator(), "structure:ADD");
    }

    #[test]
    fn test_ad_hoc_individuals_keep_their_shape() {
        let mut config = SearchConfig::default();
        config.structure_mutation_probability = 1.0;
        let mut sampler = RestSampler::new(catalog(), &config);
        let mutator = Mutator::new(&config);
        let mut rng = Randomness::seeded(5);
        sampler.init_ad_hoc(None, &mut rng).unwrap();
        let individual = sampler.sample(None, 0.0, &mut rng).unwrap();
        let parent = EvaluatedIndividual::new(individual, FitnessValue::new(1.0), Vec::new());
        let mutation = mutator
            .mutate(&parent, &sampler, None, &AdaptiveControl::default(), &mut rng)
            .unwrap();
        assert!(mutation.structure.is_none());
        assert_eq!(mutation.individual.size(), 1);
    }
}
