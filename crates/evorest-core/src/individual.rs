//! Individuals: one candidate test case.
//!
//! Main actions are grouped into [`ResourceCall`] blocks. A block is the unit
//! of structural mutation (added, removed, swapped or replaced as a whole),
//! so location chains and parameter bindings never cross block boundaries.
//!
//! Bindings are an explicit table per block: a bound parameter is a mirror of
//! its source and receives the source's value on every
//! [`Individual::enforce_coherence`]. Mirrors are never selected for
//! mutation, so cloning an individual cannot create accidental aliases.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::action::{Action, BindingMatch, RestCallAction};
use crate::error::CoreError;
use crate::gene::{Gene, GeneContext, GeneKind};
use crate::id::{IndividualId, InsertionId};
use crate::path::RestPath;
use crate::randomness::Randomness;
use crate::sql::{self, SqlAction};

/// How an individual came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    Random,
    Smart,
    SmartResource,
    AdHoc,
}

/// Outcome of materializing a resource call block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    /// No creation was needed.
    NotExisting,
    /// The block starts with the calls that create its resource.
    Created,
    /// The creation chain did not fit in the allowed test size.
    NotEnoughLength,
    /// No way to create the resource is known.
    NotFound,
    /// A resource this one depends on cannot be created.
    NotFoundDependent,
}

/// Which genes a view includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneFilter {
    All,
    NoSql,
    OnlySql,
}

/// Where a bound parameter takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingSource {
    /// A parameter (or a field of a body parameter) of another action in the block.
    Param {
        action: usize,
        param: String,
        field: Option<String>,
    },
    /// A column of an initialization row.
    Column {
        insertion: InsertionId,
        column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamBinding {
    pub source: BindingSource,
    pub target_action: usize,
    pub target_param: String,
}

/// A block of REST calls on one resource, built from one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCall {
    pub resource: RestPath,
    /// Verb sequence, e.g. `POST-GET`.
    pub template: String,
    /// The block does not depend on state created elsewhere.
    pub independent: bool,
    pub status: ResourceStatus,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub bindings: Vec<ParamBinding>,
}

impl ResourceCall {
    /// A block holding a single action.
    pub fn single(action: Action) -> Self {
        let (resource, template) = match &action {
            Action::Rest(a) => (a.path.clone(), a.verb.to_string()),
            Action::Graphql(a) => (RestPath::parse("/graphql"), a.name()),
        };
        ResourceCall {
            resource,
            template,
            independent: true,
            status: ResourceStatus::NotExisting,
            actions: vec![action],
            bindings: Vec::new(),
        }
    }

    pub fn rest_actions(&self) -> impl Iterator<Item = &RestCallAction> {
        self.actions.iter().filter_map(Action::as_rest)
    }

    /// Adds a binding unless the target is already bound. Returns whether it was added.
    pub fn add_binding(&mut self, binding: ParamBinding) -> bool {
        if self.is_bound_target(binding.target_action, &binding.target_param) {
            return false;
        }
        self.bindings.push(binding);
        true
    }

    pub fn is_bound_target(&self, action: usize, param: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.target_action == action && b.target_param == param)
    }

    /// Binds each parameter to a matching one of the closest earlier action
    /// in the block. Unmatched parameters keep their own values.
    pub fn bind_by_name(&mut self) -> usize {
        let mut added = 0;
        for j in 1..self.actions.len() {
            let Some(target) = self.actions[j].as_rest() else {
                continue;
            };
            let mut found = Vec::new();
            for p in &target.params {
                let source = (0..j).rev().find_map(|i| {
                    let source = self.actions[i].as_rest()?;
                    source.binding_source_for(p).map(|m| (i, m))
                });
                if let Some((i, m)) = source {
                    found.push((i, m, p.name().to_string()));
                }
            }
            for (i, m, target_param) in found {
                let source = match m {
                    BindingMatch::Param(param) => BindingSource::Param {
                        action: i,
                        param,
                        field: None,
                    },
                    BindingMatch::BodyField { param, field } => BindingSource::Param {
                        action: i,
                        param,
                        field: Some(field),
                    },
                };
                if self.add_binding(ParamBinding {
                    source,
                    target_action: j,
                    target_param,
                }) {
                    added += 1;
                }
            }
        }
        added
    }

    fn source_value(&self, source: &BindingSource, init: &[SqlAction]) -> Option<Gene> {
        match source {
            BindingSource::Param {
                action,
                param,
                field,
            } => {
                let p = self.actions.get(*action)?.as_rest()?.param(param)?;
                let gene = match field {
                    Some(f) => p.gene.field(f)?,
                    None => &p.gene,
                };
                Some(gene.leaf().clone())
            }
            BindingSource::Column { insertion, column } => init
                .iter()
                .find(|a| a.insertion == *insertion)?
                .column(column)
                .map(|g| g.leaf().clone()),
        }
    }

    /// Copies every bound source value into its mirror.
    ///
    /// Bindings whose source disappeared (e.g. a dropped SQL row) are
    /// skipped; the mirror keeps its current value.
    pub fn sync_bindings(&mut self, init: &[SqlAction]) -> Result<(), CoreError> {
        for i in 0..self.bindings.len() {
            let binding = self.bindings[i].clone();
            let Some(value) = self.source_value(&binding.source, init) else {
                continue;
            };
            let Some(target) = self
                .actions
                .get_mut(binding.target_action)
                .and_then(Action::as_rest_mut)
                .and_then(|a| a.param_mut(&binding.target_param))
            else {
                continue;
            };
            let leaf = target.gene.leaf_mut();
            match &value.kind {
                GeneKind::ImmutableData(d) => {
                    leaf.assign_raw(&d.value);
                }
                _ if leaf.type_name() == value.type_name() => leaf.copy_value_from(&value)?,
                _ => {
                    leaf.assign_raw(&value.raw_value());
                }
            }
        }
        Ok(())
    }
}

/// One lineage step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub parent: Option<IndividualId>,
    pub operator: String,
}

/// Provenance log keeping only the most recent `max_depth` steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    entries: VecDeque<ProvenanceEntry>,
    max_depth: usize,
}

impl Lineage {
    pub fn new(max_depth: usize) -> Self {
        Lineage {
            entries: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn push(&mut self, entry: ProvenanceEntry) {
        if self.entries.len() == self.max_depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProvenanceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A mutable reference to one top-level gene together with its stable key.
pub struct GeneSlot<'a> {
    pub key: String,
    pub gene: &'a mut Gene,
}

/// A test case: initialization rows followed by blocks of main actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: IndividualId,
    pub init_actions: Vec<SqlAction>,
    pub calls: Vec<ResourceCall>,
    pub sample_type: SampleType,
    #[serde(default)]
    pub lineage: Option<Lineage>,
}

/// Key under which gene impacts are tracked: `action name::gene name`.
pub fn gene_key(action_name: &str, gene_name: &str) -> String {
    format!("{}::{}", action_name, gene_name)
}

impl Individual {
    pub fn new(calls: Vec<ResourceCall>, sample_type: SampleType) -> Self {
        Individual {
            id: IndividualId::fresh(),
            init_actions: Vec::new(),
            calls,
            sample_type,
            lineage: None,
        }
    }

    /// Number of main actions.
    pub fn size(&self) -> usize {
        self.calls.iter().map(|c| c.actions.len()).sum()
    }

    pub fn main_actions(&self) -> impl Iterator<Item = &Action> {
        self.calls.iter().flat_map(|c| c.actions.iter())
    }

    pub fn main_actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.calls.iter_mut().flat_map(|c| c.actions.iter_mut())
    }

    pub fn action_at(&self, index: usize) -> Option<&Action> {
        self.main_actions().nth(index)
    }

    /// Random and smart individuals may change shape; ad-hoc ones are fixed probes.
    pub fn can_mutate_structure(&self) -> bool {
        !matches!(self.sample_type, SampleType::AdHoc)
    }

    /// Copy with a fresh id that records `operator` in its lineage, if tracked.
    pub fn offspring(&self, operator: &str) -> Individual {
        let mut child = self.clone();
        child.id = IndividualId::fresh();
        if let Some(lineage) = child.lineage.as_mut() {
            lineage.push(ProvenanceEntry {
                parent: Some(self.id),
                operator: operator.to_string(),
            });
        }
        child
    }

    pub fn track_lineage(&mut self, max_depth: usize, operator: &str) {
        let mut lineage = Lineage::new(max_depth);
        lineage.push(ProvenanceEntry {
            parent: None,
            operator: operator.to_string(),
        });
        self.lineage = Some(lineage);
    }

    /// Snapshot of sibling values used by gene operators.
    pub fn gene_context(&self) -> GeneContext {
        let mut string_pool = Vec::new();
        let main = self.main_actions().flat_map(|a| a.genes());
        let init = self.init_actions.iter().flat_map(|a| a.genes.iter());
        for g in main.chain(init) {
            for node in g.flat_view() {
                if let GeneKind::String(s) = &node.kind {
                    if !string_pool.contains(&s.value) {
                        string_pool.push(s.value.clone());
                    }
                }
            }
        }
        GeneContext {
            string_pool,
            primary_keys: sql::primary_keys(&self.init_actions),
        }
    }

    /// Top-level genes visible under `filter`, bound mirrors included.
    pub fn see_genes(&self, filter: GeneFilter) -> Vec<&Gene> {
        let mut out = Vec::new();
        if filter != GeneFilter::NoSql {
            for a in &self.init_actions {
                out.extend(a.genes.iter());
            }
        }
        if filter != GeneFilter::OnlySql {
            for a in self.main_actions() {
                out.extend(a.genes());
            }
        }
        out
    }

    /// Mutable, unbound top-level genes under `filter`, with their keys.
    pub fn mutable_gene_slots(&mut self, filter: GeneFilter) -> Vec<GeneSlot<'_>> {
        let mut out = Vec::new();
        if filter != GeneFilter::NoSql {
            for a in self
                .init_actions
                .iter_mut()
                .filter(|a| !a.represents_existing_data)
            {
                let name = a.name();
                for g in a.genes.iter_mut().filter(|g| g.is_mutable()) {
                    out.push(GeneSlot {
                        key: gene_key(&name, &g.name),
                        gene: g,
                    });
                }
            }
        }
        if filter != GeneFilter::OnlySql {
            for call in self.calls.iter_mut() {
                let bound: HashSet<(usize, String)> = call
                    .bindings
                    .iter()
                    .map(|b| (b.target_action, b.target_param.clone()))
                    .collect();
                for (i, action) in call.actions.iter_mut().enumerate() {
                    let name = action.name();
                    for g in action.genes_mut() {
                        if !g.is_mutable() || bound.contains(&(i, g.name.clone())) {
                            continue;
                        }
                        out.push(GeneSlot {
                            key: gene_key(&name, &g.name),
                            gene: g,
                        });
                    }
                }
            }
        }
        out
    }

    /// Keys of [`mutable_gene_slots`](Self::mutable_gene_slots), same order.
    pub fn mutable_gene_keys(&mut self, filter: GeneFilter) -> Vec<String> {
        self.mutable_gene_slots(filter)
            .into_iter()
            .map(|s| s.key)
            .collect()
    }

    /// Re-establishes every binding after genes changed.
    pub fn enforce_coherence(&mut self) -> Result<(), CoreError> {
        let init = &self.init_actions;
        for call in self.calls.iter_mut() {
            call.sync_bindings(init)?;
        }
        Ok(())
    }

    /// Repairs foreign keys in the initialization sequence. Returns dropped rows.
    ///
    /// Column bindings to a dropped row are removed with it.
    pub fn repair_initialization_actions(&mut self, rng: &mut Randomness) -> usize {
        let dropped = sql::repair_foreign_keys(&mut self.init_actions, rng);
        if dropped > 0 {
            let alive: HashSet<InsertionId> = self.init_actions.iter().map(|a| a.insertion).collect();
            for call in self.calls.iter_mut() {
                call.bindings.retain(|b| match &b.source {
                    BindingSource::Column { insertion, .. } => alive.contains(insertion),
                    BindingSource::Param { .. } => true,
                });
            }
        }
        dropped
    }

    /// Fails with the first unresolved foreign key, if any.
    pub fn verify_initialization_actions(&self) -> Result<(), CoreError> {
        match sql::first_unresolved_foreign_key(&self.init_actions) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
