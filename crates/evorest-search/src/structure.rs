//! Structural mutation: changing which call blocks a test makes and in
//! which order, as opposed to the values they send.
//!
//! Blocks always move as a whole, so the location chain and parameter
//! bindings inside a block stay intact.

use evorest_core::{Individual, Randomness};

use crate::error::SearchError;
use crate::resource::{bind_call_with_front, ResourceManager};
use crate::sampler::RestSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructuralMutation {
    Add,
    Delete,
    Swap,
    Replace,
    /// Same resource, another template.
    Modify,
}

/// One applied structural mutation, with the call positions it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureChange {
    Add { at: usize },
    Delete { at: usize },
    Swap { first: usize, second: usize },
    Replace { at: usize },
    Modify { at: usize },
}

impl StructureChange {
    pub fn kind(self) -> StructuralMutation {
        match self {
            StructureChange::Add { .. } => StructuralMutation::Add,
            StructureChange::Delete { .. } => StructuralMutation::Delete,
            StructureChange::Swap { .. } => StructuralMutation::Swap,
            StructureChange::Replace { .. } => StructuralMutation::Replace,
            StructureChange::Modify { .. } => StructuralMutation::Modify,
        }
    }

    pub fn label(self) -> &'static str {
        match self.kind() {
            StructuralMutation::Add => "ADD",
            StructuralMutation::Delete => "DELETE",
            StructuralMutation::Swap => "SWAP",
            StructuralMutation::Replace => "REPLACE",
            StructuralMutation::Modify => "MODIFY",
        }
    }
}

fn random_pair(len: usize, rng: &mut Randomness) -> (usize, usize) {
    let indices: Vec<usize> = (0..len).collect();
    let mut pair = rng.choose_n(&indices, 2);
    pair.sort_unstable();
    (pair[0], pair[1])
}

// ---------------------------------------------------------------------------
// Plain REST
// ---------------------------------------------------------------------------

/// Adds, removes and swaps blocks of random and smart individuals.
#[derive(Debug, Clone)]
pub struct RestStructureMutator {
    max_test_size: usize,
}

impl RestStructureMutator {
    pub fn new(max_test_size: usize) -> Self {
        RestStructureMutator { max_test_size }
    }

    /// Mutations `individual` currently allows.
    pub fn applicable(&self, individual: &Individual) -> Vec<StructuralMutation> {
        let mut out = Vec::new();
        if individual.size() < self.max_test_size {
            out.push(StructuralMutation::Add);
        }
        if individual.calls.len() > 1 {
            out.push(StructuralMutation::Delete);
            out.push(StructuralMutation::Swap);
        }
        out
    }

    /// Applies a random applicable mutation. `None` when nothing applies.
    pub fn mutate(
        &self,
        individual: &mut Individual,
        sampler: &RestSampler,
        rng: &mut Randomness,
    ) -> Result<Option<StructureChange>, SearchError> {
        let ops = self.applicable(individual);
        match rng.choose(&ops).copied() {
            Some(op) => self.apply(op, individual, sampler, rng),
            None => Ok(None),
        }
    }

    pub fn apply(
        &self,
        op: StructuralMutation,
        individual: &mut Individual,
        sampler: &RestSampler,
        rng: &mut Randomness,
    ) -> Result<Option<StructureChange>, SearchError> {
        let n = individual.calls.len();
        let change = match op {
            StructuralMutation::Add => {
                let Some(call) = sampler.sample_random_call(rng)? else {
                    return Ok(None);
                };
                if individual.size() + call.actions.len() > self.max_test_size {
                    return Ok(None);
                }
                let at = rng.next_index(n + 1);
                individual.calls.insert(at, call);
                StructureChange::Add { at }
            }
            StructuralMutation::Delete if n > 1 => {
                let at = rng.next_index(n);
                individual.calls.remove(at);
                StructureChange::Delete { at }
            }
            StructuralMutation::Swap if n > 1 => {
                let (first, second) = random_pair(n, rng);
                individual.calls.swap(first, second);
                StructureChange::Swap { first, second }
            }
            _ => return Ok(None),
        };
        Ok(Some(change))
    }
}

// ---------------------------------------------------------------------------
// Resource-based
// ---------------------------------------------------------------------------

/// ADD, DELETE, SWAP, REPLACE and MODIFY on whole resource calls.
#[derive(Debug, Clone)]
pub struct ResourceStructureMutator {
    max_test_size: usize,
}

impl ResourceStructureMutator {
    pub fn new(max_test_size: usize) -> Self {
        ResourceStructureMutator { max_test_size }
    }

    pub fn applicable(&self, individual: &Individual, manager: &ResourceManager) -> Vec<StructuralMutation> {
        let mut out = Vec::new();
        let n = individual.calls.len();
        if individual.size() < self.max_test_size {
            out.push(StructuralMutation::Add);
        }
        if n > 1 {
            out.push(StructuralMutation::Delete);
            out.push(StructuralMutation::Swap);
        }
        if n > 0 && manager.cluster().len() > 1 {
            out.push(StructuralMutation::Replace);
        }
        if !self.modifiable(individual, manager).is_empty() {
            out.push(StructuralMutation::Modify);
        }
        out
    }

    fn modifiable(&self, individual: &Individual, manager: &ResourceManager) -> Vec<usize> {
        individual
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                manager
                    .cluster()
                    .find(&c.resource)
                    .is_some_and(|r| r.templates().count() > 1)
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn mutate(
        &self,
        individual: &mut Individual,
        manager: &mut ResourceManager,
        rng: &mut Randomness,
    ) -> Result<Option<StructureChange>, SearchError> {
        let ops = self.applicable(individual, manager);
        match rng.choose(&ops).copied() {
            Some(op) => self.apply(op, individual, manager, rng),
            None => Ok(None),
        }
    }

    pub fn apply(
        &self,
        op: StructuralMutation,
        individual: &mut Individual,
        manager: &mut ResourceManager,
        rng: &mut Randomness,
    ) -> Result<Option<StructureChange>, SearchError> {
        let n = individual.calls.len();
        let change = match op {
            StructuralMutation::Add => {
                let Some(call) = manager.handle_add_resource(individual, rng)? else {
                    return Ok(None);
                };
                let key = call.resource.to_string();
                // In front of the first call known to depend on the new resource.
                let at = individual
                    .calls
                    .iter()
                    .position(|c| {
                        let existing = c.resource.to_string();
                        existing != key && manager.dependencies().relation(&existing, &key).is_some()
                    })
                    .unwrap_or_else(|| rng.next_index(n + 1));
                individual.calls.insert(at, call);
                StructureChange::Add { at }
            }
            StructuralMutation::Delete if n > 1 => {
                let at = rng.next_index(n);
                individual.calls.remove(at);
                StructureChange::Delete { at }
            }
            StructuralMutation::Swap if n > 1 => {
                let (first, second) = random_pair(n, rng);
                individual.calls.swap(first, second);
                StructureChange::Swap { first, second }
            }
            StructuralMutation::Replace if n > 0 => {
                let at = rng.next_index(n);
                let room = self.room_for(individual, at);
                let current = individual.calls[at].resource.to_string();
                let others: Vec<String> = manager
                    .cluster()
                    .keys()
                    .filter(|k| **k != current)
                    .cloned()
                    .collect();
                let Some(key) = rng.choose(&others).cloned() else {
                    return Ok(None);
                };
                let Some(call) = manager.sample_call(&key, None, rng, room)? else {
                    return Ok(None);
                };
                individual.calls[at] = call;
                StructureChange::Replace { at }
            }
            StructuralMutation::Modify => {
                let candidates = self.modifiable(individual, manager);
                let Some(at) = rng.choose(&candidates).copied() else {
                    return Ok(None);
                };
                let room = self.room_for(individual, at);
                let call = &individual.calls[at];
                let Some(resource) = manager.cluster().find(&call.resource) else {
                    return Ok(None);
                };
                let templates: Vec<String> = resource
                    .templates()
                    .filter(|t| t.template != call.template)
                    .map(|t| t.template.clone())
                    .collect();
                let key = resource.key();
                let Some(template) = rng.choose(&templates).cloned() else {
                    return Ok(None);
                };
                let Some(call) = manager.sample_call(&key, Some(&template), rng, room)? else {
                    return Ok(None);
                };
                individual.calls[at] = call;
                StructureChange::Modify { at }
            }
            _ => return Ok(None),
        };

        if let StructureChange::Add { at } | StructureChange::Replace { at } | StructureChange::Modify { at } =
            change
        {
            bind_call_with_front(individual, at)?;
            manager.maybe_prepare_call(individual, at, rng)?;
        }
        Ok(Some(change))
    }

    /// Actions available to a block replacing the call at `at`.
    fn room_for(&self, individual: &Individual, at: usize) -> usize {
        let others = individual.size() - individual.calls[at].actions.len();
        self.max_test_size.saturating_sub(others)
    }
}
