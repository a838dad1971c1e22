//! Sampling of new individuals.
//!
//! Three sources feed the search, in this order of priority:
//!
//! - **ad-hoc** individuals: fixed probes built once at startup (one per
//!   catalog action, or per resource template when resources are handled)
//!   and consumed before anything else
//! - **resource** sampling: one of S1iR, S1dR, S2dR or SMdR, chosen by the
//!   configured [`ResourceSamplingStrategy`]
//! - **smart** (template) or **random** sampling otherwise

use std::collections::VecDeque;
use std::fmt;

use evorest_core::{Action, ActionCatalog, GeneContext, Individual, Randomness, ResourceCall, SampleType};

use crate::config::{ResourceSamplingStrategy, SearchConfig};
use crate::error::SearchError;
use crate::resource::{ResourceCluster, ResourceManager, SamplingApplicability};

/// Resource-based sampling methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceSamplingMethod {
    /// One resource call that needs nothing created beforehand.
    S1iR,
    /// One resource call that creates what it uses.
    S1dR,
    /// Two related resource calls.
    S2dR,
    /// Several resource calls.
    SMdR,
}

impl ResourceSamplingMethod {
    pub const ALL: [ResourceSamplingMethod; 4] = [
        ResourceSamplingMethod::S1iR,
        ResourceSamplingMethod::S1dR,
        ResourceSamplingMethod::S2dR,
        ResourceSamplingMethod::SMdR,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether the cluster offers anything to start this method from.
    pub fn is_applicable(self, a: &SamplingApplicability) -> bool {
        match self {
            ResourceSamplingMethod::S1iR => a.independent > 0,
            ResourceSamplingMethod::S1dR => a.dependent > 0,
            ResourceSamplingMethod::S2dR => a.related > 0,
            ResourceSamplingMethod::SMdR => a.resources >= 2,
        }
    }

    fn count(self, a: &SamplingApplicability) -> usize {
        match self {
            ResourceSamplingMethod::S1iR => a.independent,
            ResourceSamplingMethod::S1dR => a.dependent,
            ResourceSamplingMethod::S2dR => a.related,
            ResourceSamplingMethod::SMdR => a.resources,
        }
    }
}

impl fmt::Display for ResourceSamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceSamplingMethod::S1iR => "S1iR",
            ResourceSamplingMethod::S1dR => "S1dR",
            ResourceSamplingMethod::S2dR => "S2dR",
            ResourceSamplingMethod::SMdR => "SMdR",
        };
        f.write_str(name)
    }
}

/// How individuals sampled by one method fared in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodFeedback {
    pub times: u32,
    pub improvements: u32,
    pub consecutive_failures: u32,
}

impl MethodFeedback {
    fn record(&mut self, improved: bool) {
        self.times += 1;
        if improved {
            self.improvements += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestSampler {
    catalog: ActionCatalog,
    cluster: ResourceCluster,
    ad_hoc: VecDeque<Individual>,
    max_test_size: usize,
    prob_smart: f64,
    strategy: ResourceSamplingStrategy,
    customized: [f64; 4],
    feedback: [MethodFeedback; 4],
    last_method: Option<ResourceSamplingMethod>,
}

impl RestSampler {
    pub fn new(catalog: ActionCatalog, config: &SearchConfig) -> Self {
        let cluster = ResourceCluster::from_catalog(&catalog);
        RestSampler {
            catalog,
            cluster,
            ad_hoc: VecDeque::new(),
            max_test_size: config.max_test_size.max(1),
            prob_smart: config.prob_of_smart_sampling,
            strategy: config.resource_sample_strategy,
            customized: [config.s1ir, config.s1dr, config.s2dr, config.smdr],
            feedback: [MethodFeedback::default(); 4],
            last_method: None,
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    // -----------------------------------------------------------------------
    // Ad-hoc individuals
    // -----------------------------------------------------------------------

    /// Queues the initial probes: resource templates when a manager is
    /// given, one individual per catalog action otherwise.
    pub fn init_ad_hoc(
        &mut self,
        manager: Option<&ResourceManager>,
        rng: &mut Randomness,
    ) -> Result<usize, SearchError> {
        let individuals = match manager {
            Some(m) => m.create_ad_hoc_individuals(rng)?,
            None => {
                let ctx = GeneContext::default();
                let mut out = Vec::with_capacity(self.catalog.len());
                for proto in self.catalog.iter() {
                    let mut action = proto.clone();
                    action.randomize(rng, &ctx)?;
                    out.push(Individual::new(vec![ResourceCall::single(action)], SampleType::AdHoc));
                }
                out
            }
        };
        self.ad_hoc = individuals.into();
        tracing::debug!(count = self.ad_hoc.len(), "ad-hoc individuals queued");
        Ok(self.ad_hoc.len())
    }

    pub fn has_ad_hoc(&self) -> bool {
        !self.ad_hoc.is_empty()
    }

    // -----------------------------------------------------------------------
    // Random and smart
    // -----------------------------------------------------------------------

    /// A single randomized catalog action.
    pub fn sample_random_call(&self, rng: &mut Randomness) -> Result<Option<ResourceCall>, SearchError> {
        let actions: Vec<&Action> = self.catalog.iter().collect();
        let Some(proto) = rng.choose(&actions) else {
            return Ok(None);
        };
        let mut action = Action::clone(proto);
        action.randomize(rng, &GeneContext::default())?;
        Ok(Some(ResourceCall::single(action)))
    }

    /// Between 1 and `maxTestSize` random actions.
    pub fn sample_random_individual(&self, rng: &mut Randomness) -> Result<Individual, SearchError> {
        if self.catalog.is_empty() {
            return Err(SearchError::Invariant("empty action catalog".to_string()));
        }
        let n = rng.next_int(1, self.max_test_size as i64) as usize;
        let mut calls = Vec::with_capacity(n);
        for _ in 0..n {
            calls.extend(self.sample_random_call(rng)?);
        }
        Ok(Individual::new(calls, SampleType::Random))
    }

    /// One template block of a random resource. Falls back to a random
    /// individual when the block cannot be built.
    pub fn sample_smart_individual(&self, rng: &mut Randomness) -> Result<Individual, SearchError> {
        let resources: Vec<_> = self.cluster.iter().collect();
        if let Some(resource) = rng.choose(&resources) {
            if let Some(template) = resource.random_template(rng).map(|t| t.template.clone()) {
                let call = resource.gen_calls(&template, rng, self.max_test_size, &GeneContext::default())?;
                if let Some(call) = call.filter(|c| c.actions.len() <= self.max_test_size) {
                    return Ok(Individual::new(vec![call], SampleType::Smart));
                }
            }
        }
        self.sample_random_individual(rng)
    }

    // -----------------------------------------------------------------------
    // Resource-based
    // -----------------------------------------------------------------------

    /// Picks the method for the next resource sample. `used_budget` is the
    /// fraction of the search budget spent so far.
    pub fn select_method(
        &self,
        applicability: &SamplingApplicability,
        used_budget: f64,
        rng: &mut Randomness,
    ) -> Option<ResourceSamplingMethod> {
        let applicable: Vec<ResourceSamplingMethod> = ResourceSamplingMethod::ALL
            .into_iter()
            .filter(|m| m.is_applicable(applicability))
            .collect();
        if applicable.is_empty() {
            return None;
        }
        let weights: Vec<f64> = match self.strategy {
            ResourceSamplingStrategy::None | ResourceSamplingStrategy::EqualProbability => {
                vec![1.0; applicable.len()]
            }
            ResourceSamplingStrategy::Customized => {
                applicable.iter().map(|m| self.customized[m.index()]).collect()
            }
            ResourceSamplingStrategy::Actions => applicable
                .iter()
                .map(|m| m.count(applicability) as f64)
                .collect(),
            ResourceSamplingStrategy::TimeBudgets => {
                // methods take turns over consecutive slices of the budget
                let slot = (used_budget.clamp(0.0, 1.0) * applicable.len() as f64) as usize;
                return applicable.get(slot.min(applicable.len() - 1)).copied();
            }
            ResourceSamplingStrategy::Archive => applicable
                .iter()
                .map(|m| 1.0 + f64::from(self.feedback[m.index()].improvements))
                .collect(),
            ResourceSamplingStrategy::ConArchive => applicable
                .iter()
                .map(|m| 1.0 / (1.0 + f64::from(self.feedback[m.index()].consecutive_failures)))
                .collect(),
        };
        match rng.choose_weighted(&weights) {
            Some(i) => applicable.get(i).copied(),
            None => rng.choose(&applicable).copied(),
        }
    }

    /// A resource-based individual, with SQL rows layered beneath its calls
    /// when the manager has a schema.
    pub fn sample_resource_individual(
        &mut self,
        manager: &mut ResourceManager,
        used_budget: f64,
        rng: &mut Randomness,
    ) -> Result<Individual, SearchError> {
        let applicability = manager.applicability();
        let Some(method) = self.select_method(&applicability, used_budget, rng) else {
            return self.sample_random_individual(rng);
        };
        let max = self.max_test_size;
        let calls: Vec<ResourceCall> = match method {
            ResourceSamplingMethod::S1iR => manager.sample_independent_call(rng, max)?.into_iter().collect(),
            ResourceSamplingMethod::S1dR => manager.sample_dependent_call(rng, max)?.into_iter().collect(),
            ResourceSamplingMethod::S2dR => manager.sample_related_calls(rng, max)?,
            ResourceSamplingMethod::SMdR => {
                let wanted = rng.next_int(2, max.max(2) as i64) as usize;
                manager.sample_multiple_calls(rng, max, wanted)?
            }
        };
        if calls.is_empty() {
            tracing::debug!(%method, "resource sampling produced nothing");
            return self.sample_random_individual(rng);
        }
        let mut individual = Individual::new(calls, SampleType::SmartResource);
        manager.prepare_with_sql(&mut individual, rng)?;
        self.last_method = Some(method);
        Ok(individual)
    }

    /// Credits the method that produced the last resource sample.
    pub fn feedback(&mut self, improved: bool) {
        if let Some(method) = self.last_method.take() {
            self.feedback[method.index()].record(improved);
        }
    }

    pub fn method_feedback(&self, method: ResourceSamplingMethod) -> MethodFeedback {
        self.feedback[method.index()]
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Next individual to evaluate.
    pub fn sample(
        &mut self,
        manager: Option<&mut ResourceManager>,
        used_budget: f64,
        rng: &mut Randomness,
    ) -> Result<Individual, SearchError> {
        self.last_method = None;
        if let Some(individual) = self.ad_hoc.pop_front() {
            return Ok(individual);
        }
        match manager {
            Some(m) if self.strategy != ResourceSamplingStrategy::None => {
                self.sample_resource_individual(m, used_budget, rng)
            }
            _ if rng.next_bool(self.prob_smart) => self.sample_smart_individual(rng),
            _ => self.sample_random_individual(rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evorest_core::{Gene, HttpVerb, Param, ParamKind, ResourceStatus, RestCallAction, RestPath};

    fn catalog(entries: &[(HttpVerb, &str)]) -> ActionCatalog {
        entries
            .iter()
            .map(|(verb, path)| {
                let path = RestPath::parse(path);
                let mut a = RestCallAction::new(*verb, path.clone());
                for v in path.variable_names() {
                    a.params.push(Param::new(ParamKind::Path, Gene::int64(v)));
                }
                Action::Rest(a)
            })
            .collect()
    }

    fn orders() -> ActionCatalog {
        catalog(&[(HttpVerb::Post, "/orders"), (HttpVerb::Get, "/orders/{id}")])
    }

    #[test]
    fn test_random_individuals_respect_max_size() {
        let mut config = SearchConfig::default();
        config.max_test_size = 4;
        let sampler = RestSampler::new(orders(), &config);
        let mut rng = Randomness::seeded(1);
        for _ in 0..30 {
            let ind = sampler.sample_random_individual(&mut rng).unwrap();
            assert!((1..=4).contains(&ind.size()));
            assert_eq!(ind.sample_type, SampleType::Random);
        }
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let sampler = RestSampler::new(ActionCatalog::new(), &SearchConfig::default());
        let mut rng = Randomness::seeded(1);
        assert!(sampler.sample_random_individual(&mut rng).is_err());
    }

    #[test]
    fn test_ad_hoc_individuals_come_first() {
        let config = SearchConfig::default();
        let mut sampler = RestSampler::new(orders(), &config);
        let mut rng = Randomness::seeded(2);
        assert_eq!(sampler.init_ad_hoc(None, &mut rng).unwrap(), 2);
        for _ in 0..2 {
            let ind = sampler.sample(None, 0.0, &mut rng).unwrap();
            assert_eq!(ind.sample_type, SampleType::AdHoc);
            assert!(!ind.can_mutate_structure());
        }
        assert!(!sampler.has_ad_hoc());
        assert_ne!(sampler.sample(None, 0.0, &mut rng).unwrap().sample_type, SampleType::AdHoc);
    }

    #[test]
    fn test_smart_sample_creates_before_reading() {
        let mut config = SearchConfig::default();
        config.prob_of_smart_sampling = 1.0;
        let sampler = RestSampler::new(orders(), &config);
        let mut rng = Randomness::seeded(3);
        for _ in 0..20 {
            let ind = sampler.sample_smart_individual(&mut rng).unwrap();
            assert_eq!(ind.sample_type, SampleType::Smart);
            let call = &ind.calls[0];
            if call.template == "POST-GET" {
                assert_eq!(call.status, ResourceStatus::Created);
                assert_eq!(call.actions.len(), 2);
                assert_eq!(call.actions[0].as_rest().unwrap().verb, HttpVerb::Post);
            }
        }
    }

    #[test]
    fn test_method_applicability() {
        let a = SamplingApplicability {
            independent: 1,
            dependent: 0,
            related: 0,
            resources: 1,
        };
        let config = SearchConfig::default();
        let sampler = RestSampler::new(orders(), &config);
        let mut rng = Randomness::seeded(4);
        for _ in 0..10 {
            assert_eq!(
                sampler.select_method(&a, 0.3, &mut rng),
                Some(ResourceSamplingMethod::S1iR)
            );
        }
        assert_eq!(
            sampler.select_method(&SamplingApplicability::default(), 0.3, &mut rng),
            None
        );
    }

    #[test]
    fn test_time_budgets_take_turns() {
        let mut config = SearchConfig::default();
        config.resource_sample_strategy = ResourceSamplingStrategy::TimeBudgets;
        let sampler = RestSampler::new(orders(), &config);
        let a = SamplingApplicability {
            independent: 1,
            dependent: 1,
            related: 1,
            resources: 2,
        };
        let mut rng = Randomness::seeded(5);
        assert_eq!(sampler.select_method(&a, 0.0, &mut rng), Some(ResourceSamplingMethod::S1iR));
        assert_eq!(sampler.select_method(&a, 0.6, &mut rng), Some(ResourceSamplingMethod::S2dR));
        assert_eq!(sampler.select_method(&a, 1.0, &mut rng), Some(ResourceSamplingMethod::SMdR));
    }

    #[test]
    fn test_customized_weights_exclude_zero_methods() {
        let mut config = SearchConfig::default();
        config.resource_sample_strategy = ResourceSamplingStrategy::Customized;
        config.s1ir = 0.0;
        config.s1dr = 1.0;
        config.s2dr = 0.0;
        config.smdr = 0.0;
        let sampler = RestSampler::new(orders(), &config);
        let a = SamplingApplicability {
            independent: 1,
            dependent: 1,
            related: 1,
            resources: 2,
        };
        let mut rng = Randomness::seeded(6);
        for _ in 0..20 {
            assert_eq!(sampler.select_method(&a, 0.5, &mut rng), Some(ResourceSamplingMethod::S1dR));
        }
    }

    #[test]
    fn test_resource_sample_feedback_is_credited() {
        let mut config = SearchConfig::default();
        config.resource_sample_strategy = ResourceSamplingStrategy::EqualProbability;
        let mut manager = ResourceManager::new(&orders(), None, &config);
        let mut sampler = RestSampler::new(orders(), &config);
        let mut rng = Randomness::seeded(7);
        let ind = sampler.sample(Some(&mut manager), 0.1, &mut rng).unwrap();
        assert_eq!(ind.sample_type, SampleType::SmartResource);
        sampler.feedback(true);
        let total: u32 = ResourceSamplingMethod::ALL
            .iter()
            .map(|m| sampler.method_feedback(*m).improvements)
            .sum();
        assert_eq!(total, 1);
        sampler.feedback(true);
        let total: u32 = ResourceSamplingMethod::ALL
            .iter()
            .map(|m| sampler.method_feedback(*m).times)
            .sum();
        assert_eq!(total, 1);
    }
}
