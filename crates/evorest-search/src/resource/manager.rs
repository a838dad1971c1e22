//! Resource-dependency manager.
//!
//! Owns the resource cluster and the dependency graph, learns table usage
//! and resource relations from evaluations, and builds the resource call
//! blocks the samplers and the structure mutator ask for.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use evorest_core::action::BindingMatch;
use evorest_core::individual::{BindingSource, ParamBinding};
use evorest_core::path::PathElement;
use evorest_core::{
    Action, ActionCatalog, DbSchema, GeneContext, HttpVerb, Individual, ParamKind, Randomness,
    ResourceCall, ResourceStatus, SampleType, SqlAction, SqlInsertBuilder, TargetId,
};

use crate::config::SearchConfig;
use crate::driver::SutController;
use crate::error::{DriverError, SearchError};
use crate::evaluated::EvaluatedIndividual;
use crate::fitness_value::Heuristics;
use crate::resource::dependency::{DependencyEdge, DependencyGraph};
use crate::resource::model::{ResourceCluster, RestResource};
use crate::resource::similarity::{self, SIMILARITY_THRESHOLD};
use crate::structure::StructureChange;

/// Probability of keeping a self relation as an ADD candidate.
pub const PROB_SELF_RELATION: f64 = 0.2;

/// Relation strength when downstream calls reach more targets.
const STRONG_DEPENDENCY: f64 = 1.0;
/// Relation strength when downstream calls reach new targets or succeed more often.
const MEDIUM_DEPENDENCY: f64 = 0.8;
/// Relation strength when only heuristic values moved.
const WEAK_DEPENDENCY: f64 = 0.5;

#[derive(Debug, Clone)]
struct ManagerSettings {
    max_test_size: usize,
    prob_dependency: f64,
    prob_sql: f64,
    min_row_of_table: usize,
    prob_select: f64,
    max_tables_per_call: usize,
}

impl ManagerSettings {
    fn from_config(config: &SearchConfig) -> Self {
        ManagerSettings {
            max_test_size: config.max_test_size,
            prob_dependency: config.prob_of_enabling_resource_dependency_heuristics,
            prob_sql: config.prob_of_apply_sql_action_to_create_resources,
            min_row_of_table: config.min_row_of_table,
            prob_select: config.prob_of_select_from_database,
            max_tables_per_call: config.max_sql_init_actions_per_missing_data,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-call comparison
// ---------------------------------------------------------------------------

/// What one call block achieved in an evaluation.
#[derive(Debug, Clone, Default)]
struct CallOutcome {
    targets: BTreeMap<TargetId, Heuristics>,
    successes: usize,
}

impl CallOutcome {
    fn reached(&self) -> usize {
        self.targets.values().filter(|h| h.value > 0.0).count()
    }

    fn value_sum(&self) -> f64 {
        self.targets.values().map(|h| h.value).sum()
    }

    fn reaches_targets_missing_in(&self, other: &CallOutcome) -> bool {
        self.targets
            .iter()
            .any(|(k, h)| h.value > 0.0 && !other.targets.contains_key(k))
    }
}

/// Strength of the evidence that `a` is better than `b`, if it is.
///
/// Reached targets decide first, then targets only one side reaches, then
/// successful calls, then the sum of heuristic values.
fn improvement(a: &CallOutcome, b: &CallOutcome) -> Option<f64> {
    match a.reached().cmp(&b.reached()) {
        Ordering::Greater => return Some(STRONG_DEPENDENCY),
        Ordering::Less => return None,
        Ordering::Equal => {}
    }
    match (
        a.reaches_targets_missing_in(b),
        b.reaches_targets_missing_in(a),
    ) {
        (true, false) => return Some(MEDIUM_DEPENDENCY),
        (false, true) => return None,
        _ => {}
    }
    match a.successes.cmp(&b.successes) {
        Ordering::Greater => return Some(MEDIUM_DEPENDENCY),
        Ordering::Less => return None,
        Ordering::Equal => {}
    }
    (a.value_sum() > b.value_sum() + 1e-9).then_some(WEAK_DEPENDENCY)
}

fn call_outcomes(ei: &EvaluatedIndividual) -> Vec<CallOutcome> {
    let mut start = 0;
    let mut out = Vec::with_capacity(ei.individual.calls.len());
    for call in &ei.individual.calls {
        let indices: Vec<usize> = (start..start + call.actions.len()).collect();
        start += call.actions.len();
        let successes = indices
            .iter()
            .filter(|i| ei.rest_result(**i).is_some_and(|r| r.is_successful()))
            .count();
        out.push(CallOutcome {
            targets: ei.fitness.targets_of_actions(&indices),
            successes,
        });
    }
    out
}

fn resource_keys(ei: &EvaluatedIndividual) -> Vec<String> {
    ei.individual
        .calls
        .iter()
        .map(|c| c.resource.to_string())
        .collect()
}

/// Call outcomes of one evaluated individual, next to their resource keys.
struct Probe<'a> {
    outcomes: &'a [CallOutcome],
    keys: &'a [String],
}

impl Probe<'_> {
    /// `(dependent, dependency, strength)` when call `dependent` did better
    /// here than call `other` did in `against`.
    fn compare(
        &self,
        dependent: usize,
        dependency: usize,
        against: &Probe<'_>,
        other: usize,
    ) -> Option<(String, String, f64)> {
        let p = improvement(self.outcomes.get(dependent)?, against.outcomes.get(other)?)?;
        Some((
            self.keys.get(dependent)?.clone(),
            self.keys.get(dependency)?.clone(),
            p,
        ))
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// How many resources each resource sampling method could start from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingApplicability {
    pub independent: usize,
    pub dependent: usize,
    pub related: usize,
    pub resources: usize,
}

#[derive(Debug, Clone)]
pub struct ResourceManager {
    cluster: ResourceCluster,
    dependencies: DependencyGraph,
    builder: Option<SqlInsertBuilder>,
    existing_rows: BTreeMap<String, Vec<IndexMap<String, String>>>,
    settings: ManagerSettings,
}

impl ResourceManager {
    /// Builds the resources of `catalog`. With a schema and name matching
    /// enabled, tables are related to resources by name and resources that
    /// share a table get a mutual relation.
    pub fn new(catalog: &ActionCatalog, schema: Option<DbSchema>, config: &SearchConfig) -> Self {
        let mut manager = ResourceManager {
            cluster: ResourceCluster::from_catalog(catalog),
            dependencies: DependencyGraph::new(),
            builder: schema.filter(|s| !s.is_empty()).map(SqlInsertBuilder::new),
            existing_rows: BTreeMap::new(),
            settings: ManagerSettings::from_config(config),
        };
        if config.does_apply_name_matching {
            manager.init_dependency();
        }
        tracing::info!(
            resources = manager.cluster.len(),
            sql = manager.builder.is_some(),
            relations = manager.dependencies.edge_count(),
            "resource cluster initialized"
        );
        manager
    }

    pub fn cluster(&self) -> &ResourceCluster {
        &self.cluster
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub fn dependencies_mut(&mut self) -> &mut DependencyGraph {
        &mut self.dependencies
    }

    pub fn export_dependencies(&self) -> Vec<DependencyEdge> {
        self.dependencies.export()
    }

    fn init_dependency(&mut self) {
        let Some(tables) = self
            .builder
            .as_ref()
            .map(|b| b.schema().tables.keys().cloned().collect::<Vec<_>>())
        else {
            return;
        };
        for resource in self.cluster.iter_mut() {
            let literals: Vec<&str> = resource
                .path
                .elements()
                .iter()
                .filter_map(|e| match e {
                    PathElement::Literal(l) => Some(l.as_str()),
                    PathElement::Variable(_) => None,
                })
                .collect();
            let mut related = BTreeMap::new();
            for table in &tables {
                let score = literals
                    .iter()
                    .map(|l| similarity::similarity(l, table))
                    .fold(0.0, f64::max);
                if score >= SIMILARITY_THRESHOLD {
                    related.insert(table.clone(), score);
                }
            }
            resource.related_tables.extend(related);
        }

        let mut by_table: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
        for r in self.cluster.iter() {
            for (table, score) in &r.related_tables {
                by_table
                    .entry(table.clone())
                    .or_default()
                    .push((r.key(), *score));
            }
        }
        for (table, users) in &by_table {
            for (i, (a, sa)) in users.iter().enumerate() {
                for (b, sb) in &users[i + 1..] {
                    self.dependencies.add_mutual(a, b, table, sa.min(*sb));
                }
            }
        }
    }

    /// Snapshot of the rows already in the database, used to decide
    /// between selecting and inserting.
    pub fn refresh_existing_rows(&mut self, driver: &mut dyn SutController) -> Result<(), DriverError> {
        let Some(builder) = &self.builder else {
            return Ok(());
        };
        let tables: Vec<String> = builder.schema().tables.keys().cloned().collect();
        for table in tables {
            let rows = driver.existing_rows(&table)?;
            self.existing_rows.insert(table, rows);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Learning
    // -----------------------------------------------------------------------

    /// Merges the tables each call touched into its resource. Resources that
    /// now share a table become mutually related. Returns whether anything changed.
    pub fn update_resource_tables(&mut self, ei: &EvaluatedIndividual) -> bool {
        let mut observed = Vec::new();
        for (index, execution) in ei.fitness.database_executions() {
            let Some(rest) = ei.individual.action_at(index).and_then(Action::as_rest) else {
                continue;
            };
            observed.push((rest.path.clone(), rest.verb, execution.tables()));
        }

        let mut changed = false;
        for (path, verb, tables) in observed {
            let Some(resource) = self.cluster.find_mut(&path) else {
                continue;
            };
            if !resource.record_tables(verb, tables.clone()) {
                continue;
            }
            changed = true;
            let key = resource.key();
            for table in &tables {
                let sharing: Vec<String> = self
                    .cluster
                    .iter()
                    .filter(|r| r.key() != key)
                    .filter(|r| r.tables().iter().any(|t| t.eq_ignore_ascii_case(table)))
                    .map(RestResource::key)
                    .collect();
                for other in sharing {
                    self.dependencies.add_mutual(&key, &other, table, 1.0);
                }
            }
        }
        changed
    }

    /// Compares the calls of `current` with those of `previous`, which it was
    /// derived from by exactly one structural `change`, and records the
    /// dependencies the difference shows. Returns how many edges were recorded.
    pub fn detect_dependency(
        &mut self,
        previous: &EvaluatedIndividual,
        current: &EvaluatedIndividual,
        change: StructureChange,
    ) -> usize {
        let (before_outcomes, after_outcomes) = (call_outcomes(previous), call_outcomes(current));
        let (before_keys, after_keys) = (resource_keys(previous), resource_keys(current));
        let before = Probe {
            outcomes: &before_outcomes,
            keys: &before_keys,
        };
        let after = Probe {
            outcomes: &after_outcomes,
            keys: &after_keys,
        };

        let mut found = Vec::new();
        match change {
            StructureChange::Add { at } => {
                for c in at + 1..after_outcomes.len() {
                    found.extend(after.compare(c, at, &before, c - 1));
                }
            }
            StructureChange::Delete { at } => {
                for c in at + 1..before_outcomes.len() {
                    found.extend(before.compare(c, at, &after, c - 1));
                }
            }
            StructureChange::Replace { at } | StructureChange::Modify { at } => {
                for c in at + 1..after_outcomes.len().min(before_outcomes.len()) {
                    match after.compare(c, at, &before, c) {
                        Some(edge) => found.push(edge),
                        None => found.extend(before.compare(c, at, &after, c)),
                    }
                }
                if matches!(change, StructureChange::Modify { .. }) {
                    found.extend(after.compare(at, at, &before, at));
                }
            }
            StructureChange::Swap { first, second } => {
                found.extend(after.compare(second, first, &before, first));
                found.extend(before.compare(second, first, &after, first));
            }
        }

        for (dependent, dependency, probability) in &found {
            self.dependencies
                .record_dependency_edge(dependent, dependency, change.label(), *probability);
        }
        found.len()
    }

    // -----------------------------------------------------------------------
    // Sampling calls
    // -----------------------------------------------------------------------

    pub fn applicability(&self) -> SamplingApplicability {
        let mut out = SamplingApplicability {
            resources: self.cluster.len(),
            ..Default::default()
        };
        for r in self.cluster.iter() {
            if r.has_independent_template() {
                out.independent += 1;
            }
            if r.has_dependent_template() {
                out.dependent += 1;
            }
            if self.dependencies.has_relations(&r.key()) {
                out.related += 1;
            }
        }
        out
    }

    /// A block for resource `key`, from `template` or a random one.
    pub fn sample_call(
        &self,
        key: &str,
        template: Option<&str>,
        rng: &mut Randomness,
        max_size: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let Some(resource) = self.cluster.get(key) else {
            return Ok(None);
        };
        let template = match template {
            Some(t) => t.to_string(),
            None => match resource.random_template(rng) {
                Some(t) => t.template.clone(),
                None => return Ok(None),
            },
        };
        let call = resource.gen_calls(&template, rng, max_size, &GeneContext::default())?;
        Ok(call.filter(|c| c.actions.len() <= max_size))
    }

    pub fn sample_any_call(
        &self,
        rng: &mut Randomness,
        max_size: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let keys: Vec<&String> = self.cluster.keys().collect();
        match rng.choose(&keys) {
            Some(key) => self.sample_call(key, None, rng, max_size),
            None => Ok(None),
        }
    }

    /// S1iR: one block that needs nothing created elsewhere.
    pub fn sample_independent_call(
        &self,
        rng: &mut Randomness,
        max_size: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let candidates: Vec<&RestResource> = self
            .cluster
            .iter()
            .filter(|r| r.has_independent_template())
            .collect();
        let Some(resource) = rng.choose(&candidates) else {
            return self.sample_any_call(rng, max_size);
        };
        let templates = resource.independent_templates();
        let Some(template) = rng.choose(&templates).map(|t| t.template.clone()) else {
            return Ok(None);
        };
        self.sample_call(&resource.key(), Some(&template), rng, max_size)
    }

    /// S1dR: one block that creates what it uses.
    pub fn sample_dependent_call(
        &self,
        rng: &mut Randomness,
        max_size: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let candidates: Vec<&RestResource> = self
            .cluster
            .iter()
            .filter(|r| r.has_dependent_template())
            .collect();
        let Some(resource) = rng.choose(&candidates) else {
            return self.sample_any_call(rng, max_size);
        };
        let templates = resource.dependent_templates();
        let Some(template) = rng.choose(&templates).map(|t| t.template.clone()) else {
            return Ok(None);
        };
        self.sample_call(&resource.key(), Some(&template), rng, max_size)
    }

    /// S2dR: a resource and one it is related to, the related one first.
    pub fn sample_related_calls(
        &self,
        rng: &mut Randomness,
        max_size: usize,
    ) -> Result<Vec<ResourceCall>, SearchError> {
        let keys: Vec<String> = self
            .cluster
            .keys()
            .filter(|k| self.dependencies.has_relations(k))
            .cloned()
            .collect();
        let Some(key) = rng.choose(&keys).cloned() else {
            return self.sample_multiple_calls(rng, max_size, 2);
        };
        let related: Vec<(String, f64)> = self
            .dependencies
            .related(&key)
            .into_iter()
            .filter(|(other, _)| *other != key)
            .collect();
        let weights: Vec<f64> = related.iter().map(|(_, p)| *p).collect();
        let mut calls = Vec::new();
        let mut size = 0;
        if let Some(i) = rng.choose_weighted(&weights) {
            if let Some(first) = self.sample_call(&related[i].0, None, rng, max_size)? {
                size += first.actions.len();
                calls.push(first);
            }
        }
        if let Some(call) = self.sample_call(&key, None, rng, max_size.saturating_sub(size))? {
            calls.push(call);
        }
        Ok(calls)
    }

    /// SMdR: up to `wanted` blocks, each added the way ADD picks resources.
    pub fn sample_multiple_calls(
        &self,
        rng: &mut Randomness,
        max_size: usize,
        wanted: usize,
    ) -> Result<Vec<ResourceCall>, SearchError> {
        let mut calls: Vec<ResourceCall> = Vec::new();
        let mut size = 0;
        if let Some(first) = self.sample_dependent_call(rng, max_size)? {
            size += first.actions.len();
            calls.push(first);
        }
        while calls.len() < wanted && size < max_size {
            let present: BTreeSet<String> = calls.iter().map(|c| c.resource.to_string()).collect();
            match self.add_resource_call(&present, rng, max_size - size)? {
                Some(call) => {
                    size += call.actions.len();
                    calls.push(call);
                }
                None => break,
            }
        }
        Ok(calls)
    }

    /// A block for a resource not yet in `individual`, chosen through
    /// dependency edges when the heuristics are on.
    pub fn handle_add_resource(
        &self,
        individual: &Individual,
        rng: &mut Randomness,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let remaining = self.settings.max_test_size.saturating_sub(individual.size());
        if remaining == 0 {
            return Ok(None);
        }
        let present: BTreeSet<String> = individual
            .calls
            .iter()
            .map(|c| c.resource.to_string())
            .collect();
        self.add_resource_call(&present, rng, remaining)
    }

    fn add_resource_call(
        &self,
        present: &BTreeSet<String>,
        rng: &mut Randomness,
        remaining: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        if rng.next_bool(self.settings.prob_dependency) {
            if let Some(call) = self.handle_add_dep_resource(present, rng, remaining)? {
                return Ok(Some(call));
            }
        }
        let mut candidates: Vec<String> = self
            .cluster
            .keys()
            .filter(|k| !present.contains(*k))
            .cloned()
            .collect();
        if candidates.is_empty() {
            candidates = self.cluster.keys().cloned().collect();
        }
        match rng.choose(&candidates) {
            Some(key) => self.sample_call(key, None, rng, remaining),
            None => Ok(None),
        }
    }

    /// Candidates are the resources related to one already present. Self
    /// relations survive with [`PROB_SELF_RELATION`], others with their
    /// relation probability.
    fn handle_add_dep_resource(
        &self,
        present: &BTreeSet<String>,
        rng: &mut Randomness,
        remaining: usize,
    ) -> Result<Option<ResourceCall>, SearchError> {
        let mut candidates: Vec<String> = Vec::new();
        for key in present {
            for (other, probability) in self.dependencies.related(key) {
                let keep = if other == *key {
                    rng.next_bool(PROB_SELF_RELATION)
                } else {
                    !present.contains(&other) && rng.next_bool(probability)
                };
                if keep && !candidates.contains(&other) {
                    candidates.push(other);
                }
            }
        }
        match rng.choose(&candidates) {
            Some(key) => self.sample_call(key, None, rng, remaining),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // SQL preparation
    // -----------------------------------------------------------------------

    /// Layers SQL rows beneath each call with probability
    /// `probOfApplySQLActionToCreateResources`, then repairs the foreign keys
    /// of the initialization sequence. Returns the rows kept.
    pub fn prepare_with_sql(
        &mut self,
        individual: &mut Individual,
        rng: &mut Randomness,
    ) -> Result<usize, SearchError> {
        if self.builder.is_none() || self.settings.prob_sql <= 0.0 {
            return Ok(0);
        }
        let statuses: Vec<ResourceStatus> = individual.calls.iter().map(|c| c.status).collect();
        let mut added = 0;
        for i in 0..individual.calls.len() {
            added += self.maybe_prepare_call(individual, i, rng)?;
        }
        if added == 0 {
            return Ok(0);
        }

        let dropped = individual.repair_initialization_actions(rng);
        if dropped > 0 {
            tracing::debug!(dropped, "layered SQL rows dropped by repair");
            for (call, before) in individual.calls.iter_mut().zip(statuses) {
                let backed = call
                    .bindings
                    .iter()
                    .any(|b| matches!(b.source, BindingSource::Column { .. }));
                if !backed {
                    call.status = before;
                }
            }
        }
        individual.verify_initialization_actions()?;
        individual.enforce_coherence()?;
        Ok(added - dropped.min(added))
    }

    /// [`handle_call_with_db_action`](Self::handle_call_with_db_action) on
    /// one call, with probability `probOfApplySQLActionToCreateResources`.
    pub fn maybe_prepare_call(
        &mut self,
        individual: &mut Individual,
        call_index: usize,
        rng: &mut Randomness,
    ) -> Result<usize, SearchError> {
        if self.builder.is_none() || !rng.next_bool(self.settings.prob_sql) {
            return Ok(0);
        }
        self.handle_call_with_db_action(individual, call_index, rng)
    }

    /// Inserts (or selects, when the table already holds at least
    /// `minRowOfTable` rows) a row for each table of the call's resource and
    /// binds the call's path and query parameters to matching columns.
    pub fn handle_call_with_db_action(
        &mut self,
        individual: &mut Individual,
        call_index: usize,
        rng: &mut Randomness,
    ) -> Result<usize, SearchError> {
        let Some(builder) = self.builder.as_mut() else {
            return Ok(0);
        };
        let Some(call) = individual.calls.get(call_index) else {
            return Ok(0);
        };
        let Some(resource) = self.cluster.find(&call.resource) else {
            return Ok(0);
        };
        let tables: Vec<String> = resource
            .tables()
            .into_iter()
            .filter_map(|t| builder.schema().table(&t).map(|s| s.name.clone()))
            .take(self.settings.max_tables_per_call)
            .collect();

        let ctx = individual.gene_context();
        let mut added = 0;
        for table in tables {
            let rows = self.existing_rows.get(&table).map(Vec::as_slice).unwrap_or(&[]);
            let mut actions = if rows.len() >= self.settings.min_row_of_table
                && !rows.is_empty()
                && rng.next_bool(self.settings.prob_select)
            {
                let row = rows[rng.next_index(rows.len())].clone();
                builder.extract_existing(&table, &[row])?
            } else {
                builder.create_insertion(&table)?
            };
            for a in actions.iter_mut() {
                a.randomize(rng, &ctx)?;
            }
            let bound = bind_to_columns(&mut individual.calls[call_index], &table, &actions);
            tracing::debug!(table = %table, rows = actions.len(), bound, "layered SQL beneath call");
            let call = &mut individual.calls[call_index];
            if bound > 0
                && matches!(
                    call.status,
                    ResourceStatus::NotFound | ResourceStatus::NotFoundDependent
                )
            {
                call.status = ResourceStatus::Created;
            }
            added += actions.len();
            individual.init_actions.extend(actions);
        }
        Ok(added)
    }

    // -----------------------------------------------------------------------
    // Ad-hoc individuals
    // -----------------------------------------------------------------------

    /// Initial probes, deepest resources first: single non-POST/PUT calls,
    /// single POSTs, POST chains, PUTs, then every multi-verb template.
    pub fn create_ad_hoc_individuals(
        &self,
        rng: &mut Randomness,
    ) -> Result<Vec<Individual>, SearchError> {
        let ctx = GeneContext::default();
        let max_size = self.settings.max_test_size;
        let mut resources: Vec<&RestResource> = self.cluster.iter().collect();
        resources.sort_by(|a, b| b.levels().cmp(&a.levels()));

        let mut calls: Vec<ResourceCall> = Vec::new();
        for r in &resources {
            for a in r
                .actions()
                .iter()
                .filter(|a| !matches!(a.verb, HttpVerb::Post | HttpVerb::Put))
            {
                calls.extend(r.single_call(a.verb, rng, &ctx)?);
            }
        }
        for r in &resources {
            if r.action(HttpVerb::Post).is_some() && r.creation().len() <= 1 {
                calls.extend(r.gen_calls("POST", rng, max_size, &ctx)?);
            }
        }
        for r in &resources {
            if r.action(HttpVerb::Post).is_some() && r.creation().len() > 1 {
                calls.extend(r.gen_calls("POST", rng, max_size, &ctx)?);
            }
        }
        for r in &resources {
            calls.extend(r.single_call(HttpVerb::Put, rng, &ctx)?);
        }
        for r in &resources {
            let multi: Vec<String> = r
                .templates()
                .filter(|t| t.is_multi_verb())
                .map(|t| t.template.clone())
                .collect();
            for t in multi {
                calls.extend(r.gen_calls(&t, rng, max_size, &ctx)?);
            }
        }

        Ok(calls
            .into_iter()
            .filter(|c| c.actions.len() <= max_size)
            .map(|c| Individual::new(vec![c], SampleType::SmartResource))
            .collect())
    }
}

/// Binds path and query parameters of `call` to the columns of the `table`
/// row in `actions` whose names match. Returns the bindings added.
fn bind_to_columns(call: &mut ResourceCall, table: &str, actions: &[SqlAction]) -> usize {
    let Some(row) = actions
        .iter()
        .rev()
        .find(|a| a.table.eq_ignore_ascii_case(table))
    else {
        return 0;
    };
    let mut wanted = Vec::new();
    for (j, action) in call.actions.iter().enumerate() {
        let Some(rest) = action.as_rest() else {
            continue;
        };
        for p in rest
            .params
            .iter()
            .filter(|p| matches!(p.kind, ParamKind::Path | ParamKind::Query))
        {
            let best = row
                .genes
                .iter()
                .map(|g| (g, similarity::param_to_column(p.name(), table, &g.name)))
                .filter(|(g, score)| {
                    *score >= SIMILARITY_THRESHOLD && g.leaf().type_name() == p.gene.leaf().type_name()
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            if let Some((column, _)) = best {
                wanted.push(ParamBinding {
                    source: BindingSource::Column {
                        insertion: row.insertion,
                        column: column.name.clone(),
                    },
                    target_action: j,
                    target_param: p.name().to_string(),
                });
            }
        }
    }
    wanted
        .into_iter()
        .filter(|b| call.add_binding(b.clone()))
        .count()
}

/// Copies path parameter values of the call at `index` from same-named,
/// same-typed parameters of the calls in front of it. Bound and immutable
/// parameters are left alone. Returns the parameters copied.
pub fn bind_call_with_front(individual: &mut Individual, index: usize) -> Result<usize, SearchError> {
    if index == 0 || index >= individual.calls.len() {
        return Ok(0);
    }
    let (front, rest) = individual.calls.split_at_mut(index);
    let call = &mut rest[0];
    let bound: BTreeSet<(usize, String)> = call
        .bindings
        .iter()
        .map(|b| (b.target_action, b.target_param.clone()))
        .collect();

    let mut copied = 0;
    for (j, action) in call.actions.iter_mut().enumerate() {
        let Some(target) = action.as_rest_mut() else {
            continue;
        };
        for k in 0..target.params.len() {
            let param = &target.params[k];
            if param.kind != ParamKind::Path || bound.contains(&(j, param.name().to_string())) {
                continue;
            }
            let source = front
                .iter()
                .rev()
                .flat_map(|c| c.rest_actions().collect::<Vec<_>>().into_iter().rev())
                .find_map(|src| {
                    let gene = match src.binding_source_for(param)? {
                        BindingMatch::Param(name) => &src.param(&name)?.gene,
                        BindingMatch::BodyField { param, field } => {
                            src.param(&param)?.gene.field(&field)?
                        }
                    };
                    Some(gene.leaf().clone())
                });
            let Some(value) = source else {
                continue;
            };
            let leaf = target.params[k].gene.leaf_mut();
            if leaf.is_mutable() && leaf.type_name() == value.type_name() {
                leaf.copy_value_from(&value)?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluated::{ActionResult, RestCallResult};
    use crate::fitness_value::{DatabaseExecution, FitnessValue};
    use evorest_core::sql::{Column, ColumnType, ForeignKeyDef, TableSchema};
    use evorest_core::{Gene, Param, RestCallAction, RestPath};

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

    fn orders_catalog() -> ActionCatalog {
        catalog(&[
            (HttpVerb::Post, "/orders"),
            (HttpVerb::Get, "/orders/{id}"),
            (HttpVerb::Put, "/orders/{id}"),
        ])
    }

    fn orders_schema() -> DbSchema {
        DbSchema::new(vec![TableSchema {
            name: "ORDERS".into(),
            columns: vec![Column {
                name: "ID".into(),
                column_type: ColumnType::BigInt,
                primary_key: true,
                nullable: false,
                size: None,
            }],
            foreign_keys: Vec::new(),
        }])
    }

    fn evaluated(individual: Individual, fitness: FitnessValue, statuses: &[u16]) -> EvaluatedIndividual {
        let results = statuses
            .iter()
            .map(|s| {
                ActionResult::Rest(RestCallResult {
                    status_code: Some(*s),
                    ..Default::default()
                })
            })
            .collect();
        EvaluatedIndividual::new(individual, fitness, results)
    }

    fn single(manager: &ResourceManager, key: &str, verb: HttpVerb, rng: &mut Randomness) -> ResourceCall {
        manager
            .cluster()
            .get(key)
            .unwrap()
            .single_call(verb, rng, &GeneContext::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_name_matching_relates_resources_sharing_a_table() {
        let mut config = SearchConfig::default();
        config.does_apply_name_matching = true;
        let manager = ResourceManager::new(&orders_catalog(), Some(orders_schema()), &config);
        let orders = manager.cluster().get("/orders").unwrap();
        assert_eq!(orders.related_tables.get("ORDERS"), Some(&1.0));
        assert!(manager.dependencies().relation("/orders", "/orders/{id}").is_some());
        assert!(manager.dependencies().relation("/orders/{id}", "/orders").is_some());
    }

    #[test]
    fn test_update_resource_tables_from_executions() {
        let config = SearchConfig::default();
        let mut manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(3);
        let calls = vec![
            single(&manager, "/orders", HttpVerb::Post, &mut rng),
            single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng),
        ];
        let mut fv = FitnessValue::new(2.0);
        for i in 0..2 {
            let mut execution = DatabaseExecution::default();
            execution
                .queried
                .insert("ORDERS".into(), ["ID".to_string()].into());
            fv.set_database_execution(i, execution);
        }
        let ei = evaluated(Individual::new(calls, SampleType::SmartResource), fv, &[201, 200]);
        assert!(manager.update_resource_tables(&ei));
        assert!(!manager.update_resource_tables(&ei));
        assert_eq!(
            manager.cluster().get("/orders").unwrap().table_usage()[0].verb,
            HttpVerb::Post
        );
        assert!(manager.dependencies().relation("/orders/{id}", "/orders").is_some());
    }

    #[test]
    fn test_add_that_helps_later_call_is_a_dependency() {
        let config = SearchConfig::default();
        let mut manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(5);
        let get = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
        let post = single(&manager, "/orders", HttpVerb::Post, &mut rng);

        let mut before_fv = FitnessValue::new(1.0);
        before_fv.update_target(TargetId(-1), 1.0, Some(0));
        let before = evaluated(
            Individual::new(vec![get.clone()], SampleType::SmartResource),
            before_fv,
            &[404],
        );

        let mut after_fv = FitnessValue::new(2.0);
        after_fv.update_target(TargetId(-2), 1.0, Some(0));
        after_fv.update_target(TargetId(-3), 1.0, Some(1));
        after_fv.update_target(TargetId(7), 1.0, Some(1));
        let after = evaluated(
            Individual::new(vec![post, get], SampleType::SmartResource),
            after_fv,
            &[201, 200],
        );

        let recorded = manager.detect_dependency(&before, &after, StructureChange::Add { at: 0 });
        assert_eq!(recorded, 1);
        let exported = manager.export_dependencies();
        assert_eq!(exported[0].from, "/orders/{id}");
        assert_eq!(exported[0].to, "/orders");
        assert_eq!(exported[0].detail, "ADD");
        assert_eq!(exported[0].probability, STRONG_DEPENDENCY);
    }

    #[test]
    fn test_delete_without_effect_records_nothing() {
        let config = SearchConfig::default();
        let mut manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(5);
        let get = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
        let post = single(&manager, "/orders", HttpVerb::Post, &mut rng);

        let mut before_fv = FitnessValue::new(2.0);
        before_fv.update_target(TargetId(-2), 1.0, Some(0));
        before_fv.update_target(TargetId(-1), 1.0, Some(1));
        let before = evaluated(
            Individual::new(vec![post, get.clone()], SampleType::SmartResource),
            before_fv,
            &[201, 404],
        );
        let mut after_fv = FitnessValue::new(1.0);
        after_fv.update_target(TargetId(-1), 1.0, Some(0));
        let after = evaluated(
            Individual::new(vec![get], SampleType::SmartResource),
            after_fv,
            &[404],
        );
        assert_eq!(
            manager.detect_dependency(&before, &after, StructureChange::Delete { at: 0 }),
            0
        );
        assert_eq!(manager.dependencies().edge_count(), 0);
    }

    #[test]
    fn test_related_calls_put_the_dependency_first() {
        let config = SearchConfig::default();
        let mut manager = ResourceManager::new(&orders_catalog(), None, &config);
        manager
            .dependencies
            .record_dependency_edge("/orders/{id}", "/orders", "ADD", 1.0);
        let mut rng = Randomness::seeded(11);
        let calls = manager.sample_related_calls(&mut rng, 10).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].resource.to_string(), "/orders");
        assert_eq!(calls[1].resource.to_string(), "/orders/{id}");
    }

    #[test]
    fn test_add_resource_respects_remaining_size() {
        let mut config = SearchConfig::default();
        config.max_test_size = 1;
        let manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(2);
        let first = single(&manager, "/orders", HttpVerb::Post, &mut rng);
        let full = Individual::new(vec![first], SampleType::SmartResource);
        assert!(manager.handle_add_resource(&full, &mut rng).unwrap().is_none());
    }

    #[test]
    fn test_sql_row_is_bound_to_path_parameter() {
        let mut config = SearchConfig::default();
        config.does_apply_name_matching = true;
        let mut manager = ResourceManager::new(&orders_catalog(), Some(orders_schema()), &config);
        let mut rng = Randomness::seeded(9);
        let get = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
        let mut individual = Individual::new(vec![get], SampleType::SmartResource);

        let added = manager
            .handle_call_with_db_action(&mut individual, 0, &mut rng)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(individual.init_actions.len(), 1);
        assert_eq!(individual.calls[0].bindings.len(), 1);
        assert!(matches!(
            individual.calls[0].bindings[0].source,
            BindingSource::Column { .. }
        ));

        individual.enforce_coherence().unwrap();
        let pk = individual.init_actions[0].column("ID").unwrap().raw_value();
        let id = individual.calls[0].actions[0]
            .as_rest()
            .unwrap()
            .param("id")
            .unwrap()
            .gene
            .raw_value();
        assert_eq!(pk, id);
    }

    fn self_referencing_schema() -> DbSchema {
        let column = |name: &str, primary_key: bool| Column {
            name: name.into(),
            column_type: ColumnType::BigInt,
            primary_key,
            nullable: false,
            size: None,
        };
        DbSchema::new(vec![TableSchema {
            name: "ORDERS".into(),
            columns: vec![column("ID", true), column("PARENT_ID", false)],
            foreign_keys: vec![ForeignKeyDef {
                column: "PARENT_ID".into(),
                target_table: "ORDERS".into(),
            }],
        }])
    }

    #[test]
    fn test_layered_rows_are_repaired() {
        let mut config = SearchConfig::default();
        config.does_apply_name_matching = true;
        config.prob_of_apply_sql_action_to_create_resources = 1.0;

        let mut manager = ResourceManager::new(&orders_catalog(), Some(self_referencing_schema()), &config);
        for seed in 0..10 {
            let mut rng = Randomness::seeded(seed);
            let get = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
            let status = get.status;
            let mut individual = Individual::new(vec![get], SampleType::SmartResource);

            let kept = manager.prepare_with_sql(&mut individual, &mut rng).unwrap();
            assert_eq!(kept, individual.init_actions.len());
            assert!(individual.verify_initialization_actions().is_ok());
            // a row with a mandatory self reference cannot come first
            assert!(individual.init_actions.is_empty());
            assert!(individual.calls[0].bindings.is_empty());
            assert_eq!(individual.calls[0].status, status);
        }

        let mut manager = ResourceManager::new(&orders_catalog(), Some(orders_schema()), &config);
        let mut rng = Randomness::seeded(4);
        let get = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
        let mut individual = Individual::new(vec![get], SampleType::SmartResource);
        assert_eq!(manager.prepare_with_sql(&mut individual, &mut rng).unwrap(), 1);
        assert!(individual.verify_initialization_actions().is_ok());
        assert_eq!(individual.calls[0].bindings.len(), 1);
    }

    #[test]
    fn test_ad_hoc_individuals_order() {
        let config = SearchConfig::default();
        let manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(1);
        let individuals = manager.create_ad_hoc_individuals(&mut rng).unwrap();
        let templates: Vec<String> = individuals
            .iter()
            .map(|i| i.calls[0].template.clone())
            .collect();
        assert_eq!(templates, vec!["GET", "POST", "PUT", "POST-GET", "POST-PUT"]);
        assert!(individuals
            .iter()
            .all(|i| i.sample_type == SampleType::SmartResource));
    }

    #[test]
    fn test_bind_call_with_front_copies_path_ids() {
        let config = SearchConfig::default();
        let manager = ResourceManager::new(&orders_catalog(), None, &config);
        let mut rng = Randomness::seeded(21);
        let first = single(&manager, "/orders/{id}", HttpVerb::Get, &mut rng);
        let second = single(&manager, "/orders/{id}", HttpVerb::Put, &mut rng);
        let mut individual = Individual::new(vec![first, second], SampleType::SmartResource);

        assert_eq!(bind_call_with_front(&mut individual, 1).unwrap(), 1);
        let id = |c: usize| {
            individual.calls[c].actions[0]
                .as_rest()
                .unwrap()
                .param("id")
                .unwrap()
                .gene
                .raw_value()
        };
        assert_eq!(id(0), id(1));
        assert_eq!(bind_call_with_front(&mut individual, 0).unwrap(), 0);
    }
}
