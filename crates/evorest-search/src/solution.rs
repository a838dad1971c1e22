//! The final test suite extracted from the archive.

use serde::Serialize;

use evorest_core::{Action, TargetId};

use crate::evaluated::EvaluatedIndividual;
use crate::fitness_value::FitnessValue;
use crate::id_mapper::IdMapper;

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Best value reached on every target seen during the search.
    pub overall: FitnessValue,
    pub individuals: Vec<EvaluatedIndividual>,
}

impl Solution {
    pub fn new(overall: FitnessValue, individuals: Vec<EvaluatedIndividual>) -> Self {
        Solution { overall, individuals }
    }

    pub fn covered_targets(&self) -> Vec<TargetId> {
        self.overall.covered_targets()
    }

    pub fn total_actions(&self) -> usize {
        self.individuals.iter().map(|ei| ei.individual.size()).sum()
    }

    /// Serializable view, with target ids translated through `mapper`.
    pub fn report(&self, mapper: &IdMapper) -> SolutionReport {
        let describe = |t: TargetId| {
            mapper
                .descriptive_id(t)
                .map(str::to_string)
                .unwrap_or_else(|| t.0.to_string())
        };
        let tests = self
            .individuals
            .iter()
            .enumerate()
            .map(|(i, ei)| TestCaseReport {
                name: format!("test_{}", i),
                covered: ei.fitness.covered_targets().into_iter().map(describe).collect(),
                sql_inserts: ei.individual.init_actions.len(),
                calls: ei
                    .individual
                    .main_actions()
                    .enumerate()
                    .map(|(j, a)| CallReport::of(a, ei.rest_result(j).and_then(|r| r.status_code)))
                    .collect(),
            })
            .collect();
        SolutionReport {
            covered_targets: self.covered_targets().len(),
            reached_targets: self.overall.reached_targets().len(),
            covered: self.covered_targets().into_iter().map(describe).collect(),
            tests,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SolutionReport {
    pub covered_targets: usize,
    pub reached_targets: usize,
    pub covered: Vec<String>,
    pub tests: Vec<TestCaseReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestCaseReport {
    pub name: String,
    pub sql_inserts: usize,
    pub calls: Vec<CallReport>,
    pub covered: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallReport {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl CallReport {
    fn of(action: &Action, status: Option<u16>) -> Self {
        CallReport {
            action: action.name(),
            path: action.as_rest().map(|r| r.resolved_path()),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evorest_core::{Individual, SampleType};

    #[test]
    fn test_report_uses_descriptive_ids() {
        let mut mapper = IdMapper::new();
        mapper.add_mapping(TargetId(3), "Line_at_Foo_00012");
        let mut fv = FitnessValue::new(0.0);
        fv.update_target(TargetId(3), 1.0, None);
        fv.update_target(TargetId(4), 0.5, None);
        let ei = EvaluatedIndividual::new(
            Individual::new(Vec::new(), SampleType::Random),
            fv.clone(),
            Vec::new(),
        );
        let report = Solution::new(fv, vec![ei]).report(&mapper);
        assert_eq!(report.covered_targets, 1);
        assert_eq!(report.reached_targets, 2);
        assert_eq!(report.covered, vec!["Line_at_Foo_00012".to_string()]);
        assert_eq!(report.tests.len(), 1);
        assert!(report.tests[0].calls.is_empty());
    }
}
