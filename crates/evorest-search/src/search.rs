//! Shared state of one search run.
//!
//! [`SearchContext`] owns everything the algorithms share: the seeded RNG,
//! the budget, the archive, the fitness evaluator, the sampler, the mutator
//! and (when resource sampling is on) the resource-dependency manager. It is
//! single-threaded: one individual is sampled, mutated, evaluated and
//! archived at a time.

use std::collections::BTreeSet;

use evorest_core::{ActionCatalog, DbSchema, Individual, Randomness, TargetId};

use crate::archive::Archive;
use crate::config::SearchConfig;
use crate::driver::SutController;
use crate::error::SearchError;
use crate::evaluated::EvaluatedIndividual;
use crate::http::HttpTransport;
use crate::mutator::{Mutation, Mutator};
use crate::resource::ResourceManager;
use crate::rest_fitness::RestFitness;
use crate::sampler::RestSampler;
use crate::solution::Solution;
use crate::time::SearchTimeController;

pub struct SearchContext {
    pub config: SearchConfig,
    pub rng: Randomness,
    pub time: SearchTimeController,
    pub archive: Archive,
    pub fitness: RestFitness,
    pub sampler: RestSampler,
    pub mutator: Mutator,
    pub resources: Option<ResourceManager>,
}

impl SearchContext {
    /// Validates `config`, connects to the SUT and prepares the samplers.
    pub fn new(
        config: SearchConfig,
        catalog: ActionCatalog,
        schema: Option<DbSchema>,
        mut driver: Box<dyn SutController>,
        transport: Box<dyn HttpTransport>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        for option in config.experimental_features() {
            tracing::warn!(option, "experimental option enabled");
        }

        driver.check_connection()?;
        driver.start_sut()?;
        let info = driver.sut_info()?;
        let schema = schema.or_else(|| info.sql_schema.clone());
        let base_url = if config.black_box && !config.bb_target_url.is_empty() {
            config.bb_target_url.clone()
        } else {
            info.base_url
        };
        tracing::info!(base_url = %base_url, actions = catalog.len(), "SUT ready");

        let mut rng = Randomness::from_config_seed(config.seed);
        let mut resources = config
            .uses_resource_sampling()
            .then(|| ResourceManager::new(&catalog, schema, &config));
        if let Some(manager) = resources.as_mut() {
            manager.refresh_existing_rows(driver.as_mut())?;
        }

        let catalog_paths = catalog.rest_actions().map(|a| a.path.clone()).collect();
        let mut sampler = RestSampler::new(catalog, &config);
        sampler.init_ad_hoc(resources.as_ref(), &mut rng)?;

        Ok(SearchContext {
            time: SearchTimeController::new(&config),
            archive: Archive::new(&config),
            fitness: RestFitness::new(&config, driver, transport, &base_url, catalog_paths),
            mutator: Mutator::new(&config),
            sampler,
            resources,
            rng,
            config,
        })
    }

    /// A new individual from the sampler.
    pub fn sample(&mut self) -> Result<Individual, SearchError> {
        let used = self.time.percentage_used_budget();
        let mut individual = self.sampler.sample(self.resources.as_mut(), used, &mut self.rng)?;
        if self.config.enable_track_individual {
            individual.track_lineage(self.config.max_lineage_depth, "sampling");
        }
        Ok(individual)
    }

    /// Runs `individual` and accounts the budget. `None` when the driver
    /// could not report coverage.
    pub fn evaluate(&mut self, individual: Individual) -> Result<Option<EvaluatedIndividual>, SearchError> {
        let size = individual.size();
        let not_covered = self.archive.not_covered_targets();
        let evaluated = self.fitness.evaluate(individual, &not_covered)?;
        let executed = evaluated.as_ref().map_or(size, EvaluatedIndividual::executed_actions);
        self.time.new_evaluation(executed);
        if let (Some(manager), Some(ei)) = (self.resources.as_mut(), evaluated.as_ref()) {
            manager.update_resource_tables(ei);
        }
        Ok(evaluated)
    }

    /// Offers `ei` to the archive. Returns whether it was stored.
    pub fn save_to_archive(&mut self, ei: EvaluatedIndividual) -> bool {
        let apc = self.time.adaptive();
        let added = self.archive.add_if_needed(ei, &apc, self.time.evaluated_actions());
        if added {
            self.time.report_improvement();
        }
        added
    }

    /// Samples, evaluates and archives one new individual, crediting the
    /// sampling method with the outcome.
    pub fn sample_and_archive(&mut self) -> Result<Option<EvaluatedIndividual>, SearchError> {
        let individual = self.sample()?;
        let Some(mut ei) = self.evaluate(individual)? else {
            self.sampler.feedback(false);
            return Ok(None);
        };
        if self.config.enable_track_evaluated_individual {
            ei.track_history(self.config.max_lineage_depth, None, "sampling");
        }
        let added = self.save_to_archive(ei.clone());
        self.sampler.feedback(added);
        Ok(Some(ei))
    }

    /// One mutation of `current`, evaluated. Gene impacts are inherited and
    /// structural changes feed the dependency inference.
    pub fn mutate_once(
        &mut self,
        current: &EvaluatedIndividual,
    ) -> Result<Option<EvaluatedIndividual>, SearchError> {
        let apc = self.time.adaptive();
        let mutation = self.mutator.mutate(
            current,
            &self.sampler,
            self.resources.as_mut(),
            &apc,
            &mut self.rng,
        )?;
        let operator = mutation.operator();
        let Mutation {
            individual,
            mutated_genes,
            structure,
        } = mutation;
        let Some(mut mutated) = self.evaluate(individual)? else {
            return Ok(None);
        };
        current.inherit_impacts(&mut mutated, &mutated_genes);
        if self.config.enable_track_evaluated_individual {
            mutated.track_history(self.config.max_lineage_depth, Some(current), &operator);
        }
        if let (Some(manager), Some(change)) = (self.resources.as_mut(), structure) {
            let found = manager.detect_dependency(current, &mutated, change);
            if found > 0 {
                tracing::debug!(found, change = change.label(), "dependencies inferred");
            }
        }
        Ok(Some(mutated))
    }

    /// Up to `times` successive mutations starting from `current`.
    ///
    /// A mutant is archived and becomes the new starting point when it reaches
    /// a target the archive has never seen, or when `current` does not subsume
    /// it on the targets either of them reached.
    pub fn mutate_and_save(
        &mut self,
        times: usize,
        current: EvaluatedIndividual,
    ) -> Result<EvaluatedIndividual, SearchError> {
        let mut current = current;
        for _ in 0..times {
            if !self.time.should_continue_search() {
                break;
            }
            let Some(mutated) = self.mutate_once(&current)? else {
                continue;
            };
            let targets: Vec<TargetId> = current
                .fitness
                .view()
                .chain(mutated.fitness.view())
                .map(|(t, _)| t)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let accept = self.archive.would_reach_new_target(&mutated)
                || !current.fitness.subsumes(
                    &mutated.fitness,
                    &targets,
                    self.config.secondary_objective_strategy,
                    self.config.bloat_control_for_secondary_objective,
                );
            if accept {
                self.save_to_archive(mutated.clone());
                current = mutated;
            }
        }
        Ok(current)
    }

    /// Number of mutations to apply at this point of the budget.
    pub fn number_of_mutations(&self) -> usize {
        let apc = self.time.adaptive();
        apc.exploratory_int(
            i64::from(self.config.start_number_of_mutations),
            i64::from(self.config.end_number_of_mutations),
        )
        .max(0) as usize
    }

    pub fn solution(&self) -> Solution {
        self.archive.extract_solution()
    }

    /// Stops the SUT through the driver.
    pub fn shutdown(&mut self) -> Result<(), SearchError> {
        self.fitness.driver_mut().stop_sut()?;
        Ok(())
    }
}
