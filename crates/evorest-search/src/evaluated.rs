//! Individuals together with the outcome of running them.

use std::collections::BTreeMap;

use evorest_core::individual::{Lineage, ProvenanceEntry};
use evorest_core::{Individual, IndividualId};
use serde::{Deserialize, Serialize};

use crate::fitness_value::FitnessValue;

/// What happened when one REST (or GraphQL-over-HTTP) call was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestCallResult {
    pub status_code: Option<u16>,
    pub body: Option<String>,
    pub body_type: Option<String>,
    /// The body was at least `maxResponseByteSize` long and was dropped.
    pub too_large_body: bool,
    pub infinite_loop: bool,
    pub timed_out: bool,
    pub error_message: Option<String>,
    /// Location saved for the following calls of the block.
    pub location: Option<String>,
    /// The location was inferred from an id in the body.
    pub heuristics_for_chained_location: bool,
    /// Later actions were not run because of this call.
    pub stopping: bool,
}

impl RestCallResult {
    pub fn is_successful(&self) -> bool {
        self.status_code.is_some_and(|s| (200..300).contains(&s))
    }

    /// `id` field of a JSON object body, if any.
    pub fn resource_id(&self) -> Option<String> {
        let body = self.body.as_deref()?;
        let json: serde_json::Value = serde_json::from_str(body).ok()?;
        match json.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Outcome of the DB initialization that preceded the main actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationResult {
    pub executed_rows: usize,
    pub success: bool,
}

/// Result of one main action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResult {
    Rest(RestCallResult),
}

impl ActionResult {
    pub fn as_rest(&self) -> Option<&RestCallResult> {
        match self {
            ActionResult::Rest(r) => Some(r),
        }
    }

    pub fn stopping(&self) -> bool {
        match self {
            ActionResult::Rest(r) => r.stopping,
        }
    }
}

/// Mutation history of one gene, keyed by [`evorest_core::individual::gene_key`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneImpact {
    /// Times the gene was selected for mutation.
    pub times_to_manipulate: u32,
    /// Times its mutation left the fitness unchanged.
    pub times_of_no_impact: u32,
    /// Times its mutation changed the fitness.
    pub times_of_impact: u32,
    /// Consecutive mutations without impact.
    pub counter: u32,
}

impl GeneImpact {
    pub fn record(&mut self, had_impact: bool) {
        self.times_to_manipulate += 1;
        if had_impact {
            self.times_of_impact += 1;
            self.counter = 0;
        } else {
            self.times_of_no_impact += 1;
            self.counter += 1;
        }
    }
}

/// An individual, its fitness and the results of its actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedIndividual {
    pub individual: Individual,
    pub fitness: FitnessValue,
    pub results: Vec<ActionResult>,
    #[serde(default)]
    pub initialization: Option<InitializationResult>,
    #[serde(default)]
    pub impacts: BTreeMap<String, GeneImpact>,
    /// Provenance of the evaluated records this one was derived from.
    #[serde(default)]
    pub history: Option<Lineage>,
}

impl EvaluatedIndividual {
    pub fn new(individual: Individual, fitness: FitnessValue, results: Vec<ActionResult>) -> Self {
        EvaluatedIndividual {
            individual,
            fitness,
            results,
            initialization: None,
            impacts: BTreeMap::new(),
            history: None,
        }
    }

    pub fn id(&self) -> IndividualId {
        self.individual.id
    }

    /// Number of main actions that were actually executed.
    pub fn executed_actions(&self) -> usize {
        self.results.len()
    }

    pub fn rest_result(&self, index: usize) -> Option<&RestCallResult> {
        self.results.get(index).and_then(ActionResult::as_rest)
    }

    /// Carries gene impacts over to `next`, then records `mutated_genes`.
    pub fn inherit_impacts(&self, next: &mut EvaluatedIndividual, mutated_genes: &[String]) {
        let had_impact = next.fitness.reach_more_than(&self.fitness)
            || self.fitness.reach_more_than(&next.fitness);
        let mut impacts = self.impacts.clone();
        for key in mutated_genes {
            impacts.entry(key.clone()).or_default().record(had_impact);
        }
        next.impacts = impacts;
    }

    /// Enables evaluated-individual tracking with a bounded log.
    pub fn track_history(&mut self, max_depth: usize, parent: Option<&EvaluatedIndividual>, operator: &str) {
        let mut history = parent
            .and_then(|p| p.history.clone())
            .unwrap_or_else(|| Lineage::new(max_depth));
        history.push(ProvenanceEntry {
            parent: parent.map(EvaluatedIndividual::id),
            operator: operator.to_string(),
        });
        self.history = Some(history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evorest_core::{SampleType, TargetId};

    fn evaluated(value: f64) -> EvaluatedIndividual {
        let mut fv = FitnessValue::new(0.0);
        fv.update_target(TargetId(1), value, Some(0));
        EvaluatedIndividual::new(Individual::new(Vec::new(), SampleType::Random), fv, Vec::new())
    }

    #[test]
    fn test_resource_id_from_json_body() {
        let mut r = RestCallResult {
            status_code: Some(201),
            body: Some(r#"{"id": 42, "name": "x"}"#.into()),
            ..Default::default()
        };
        assert!(r.is_successful());
        assert_eq!(r.resource_id().as_deref(), Some("42"));
        r.body = Some(r#"{"id": "abc"}"#.into());
        assert_eq!(r.resource_id().as_deref(), Some("abc"));
        r.body = Some("[1,2]".into());
        assert_eq!(r.resource_id(), None);
    }

    #[test]
    fn test_gene_impacts_are_inherited_and_recorded() {
        let parent = evaluated(0.2);
        let mut same = evaluated(0.2);
        parent.inherit_impacts(&mut same, &["GET:/x::id".to_string()]);
        let impact = same.impacts["GET:/x::id"];
        assert_eq!(impact.times_to_manipulate, 1);
        assert_eq!(impact.times_of_no_impact, 1);
        assert_eq!(impact.counter, 1);

        let mut better = evaluated(0.9);
        same.inherit_impacts(&mut better, &["GET:/x::id".to_string()]);
        let impact = better.impacts["GET:/x::id"];
        assert_eq!(impact.times_to_manipulate, 2);
        assert_eq!(impact.times_of_impact, 1);
        assert_eq!(impact.counter, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut current = evaluated(0.1);
        current.track_history(2, None, "sampling");
        for _ in 0..5 {
            let mut next = evaluated(0.1);
            next.track_history(2, Some(&current), "mutation");
            current = next;
        }
        let history = current.history.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.entries().all(|e| e.operator == "mutation"));
    }
}
