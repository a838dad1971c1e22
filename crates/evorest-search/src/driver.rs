//! Control plane towards the process that runs the SUT.
//!
//! The engine only needs the operations of [`SutController`]. How they
//! travel to a remote driver is not this crate's business; the one
//! implementation shipped here is [`BlackBoxController`], which needs no
//! driver at all.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use evorest_core::{DbSchema, SqlAction, TargetId};

use crate::config::ProblemType;
use crate::error::DriverError;
use crate::fitness_value::DatabaseExecution;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// What the driver knows about the SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SutInfo {
    pub base_url: String,
    pub problem_type: ProblemType,
    /// Present when the SUT talks to a SQL database the driver can inspect.
    #[serde(default)]
    pub sql_schema: Option<DbSchema>,
}

/// Coverage of one target after the last evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: i32,
    /// Sent only the first time a target is reported.
    #[serde(default)]
    pub descriptive_id: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub action_index: Option<usize>,
}

/// Inputs the SUT read while handling one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    pub query_parameters: BTreeSet<String>,
    pub headers: BTreeSet<String>,
}

/// Auxiliary heuristics of one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraHeuristics {
    /// SQL distances, lower is better.
    #[serde(default)]
    pub to_minimize: Vec<f64>,
    #[serde(default)]
    pub database_execution: Option<DatabaseExecution>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub targets: Vec<TargetInfo>,
    /// One entry per executed action.
    #[serde(default)]
    pub additional_info: Vec<AdditionalInfo>,
    /// One entry per executed action.
    #[serde(default)]
    pub extra_heuristics: Vec<ExtraHeuristics>,
}

impl TestResults {
    /// Rejects responses no well-behaved driver would send.
    pub fn validate(&self) -> Result<(), DriverError> {
        if let Some(t) = self
            .targets
            .iter()
            .find(|t| !(0.0..=1.0).contains(&t.value) || t.value.is_nan())
        {
            return Err(DriverError::Malformed {
                operation: "getTestResults",
                reason: format!("target {} has value {} outside [0, 1]", t.id, t.value),
            });
        }
        Ok(())
    }
}

/// One row to insert before the main actions run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionDto {
    pub table: String,
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseCommand {
    pub insertions: Vec<InsertionDto>,
}

impl DatabaseCommand {
    /// Insertions for every action that does not stand for existing data.
    pub fn from_actions(actions: &[SqlAction]) -> Self {
        let insertions = actions
            .iter()
            .filter(|a| !a.represents_existing_data)
            .map(|a| InsertionDto {
                table: a.table.clone(),
                values: a.render_values(actions),
            })
            .collect();
        DatabaseCommand { insertions }
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Controller seam
// ---------------------------------------------------------------------------

/// Control operations on the SUT. Every call blocks until answered.
pub trait SutController {
    fn check_connection(&mut self) -> Result<(), DriverError>;

    fn start_sut(&mut self) -> Result<(), DriverError>;

    fn stop_sut(&mut self) -> Result<(), DriverError>;

    /// Brings the SUT back to a clean state. Required before every evaluation.
    fn reset_sut(&mut self) -> Result<(), DriverError>;

    fn sut_info(&mut self) -> Result<SutInfo, DriverError>;

    /// Announces that main action `index` is about to run.
    fn register_new_action(&mut self, index: usize) -> Result<(), DriverError>;

    /// Coverage of `ids` plus the targets newly reached. `None` when the
    /// driver could not collect it this time.
    fn test_results(&mut self, ids: &BTreeSet<TargetId>) -> Result<Option<TestResults>, DriverError>;

    /// Runs `command`. `Ok(false)` when the database rejected it.
    fn execute_database_command(&mut self, command: &DatabaseCommand) -> Result<bool, DriverError>;

    /// Rows currently stored in `table`.
    fn existing_rows(&mut self, _table: &str) -> Result<Vec<IndexMap<String, String>>, DriverError> {
        Ok(Vec::new())
    }
}

/// Controller used when no driver runs next to the SUT.
///
/// The SUT is started and reset by someone else; coverage is always empty,
/// so only the status-code targets guide the search.
#[derive(Debug, Clone)]
pub struct BlackBoxController {
    base_url: String,
    problem_type: ProblemType,
}

impl BlackBoxController {
    pub fn new(base_url: impl Into<String>, problem_type: ProblemType) -> Self {
        BlackBoxController {
            base_url: base_url.into(),
            problem_type,
        }
    }
}

impl SutController for BlackBoxController {
    fn check_connection(&mut self) -> Result<(), DriverError> {
        if self.base_url.starts_with("http://") || self.base_url.starts_with("https://") {
            Ok(())
        } else {
            Err(DriverError::NotReachable {
                url: self.base_url.clone(),
                reason: "not an http(s) URL".to_string(),
            })
        }
    }

    fn start_sut(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop_sut(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn reset_sut(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn sut_info(&mut self) -> Result<SutInfo, DriverError> {
        Ok(SutInfo {
            base_url: self.base_url.clone(),
            problem_type: self.problem_type,
            sql_schema: None,
        })
    }

    fn register_new_action(&mut self, _index: usize) -> Result<(), DriverError> {
        Ok(())
    }

    fn test_results(&mut self, _ids: &BTreeSet<TargetId>) -> Result<Option<TestResults>, DriverError> {
        Ok(Some(TestResults::default()))
    }

    fn execute_database_command(&mut self, _command: &DatabaseCommand) -> Result<bool, DriverError> {
        Err(DriverError::SutProblem(
            "database commands need a driver, black-box mode has none".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_validation_rejects_out_of_range_values() {
        let mut results = TestResults {
            targets: vec![TargetInfo {
                id: 1,
                descriptive_id: Some("Line_1".into()),
                value: 0.5,
                action_index: Some(0),
            }],
            ..Default::default()
        };
        assert!(results.validate().is_ok());
        results.targets[0].value = 1.5;
        let err = results.validate().unwrap_err();
        assert!(matches!(err, DriverError::Malformed { .. }));
    }

    #[test]
    fn test_results_deserialize_with_defaults() {
        let json = r#"{"targets": [{"id": 3, "value": 1.0}]}"#;
        let results: TestResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.targets[0].action_index, None);
        assert!(results.additional_info.is_empty());
    }

    #[test]
    fn test_black_box_controller() {
        let mut bb = BlackBoxController::new("http://localhost:8080", ProblemType::Rest);
        assert!(bb.check_connection().is_ok());
        assert_eq!(bb.sut_info().unwrap().base_url, "http://localhost:8080");
        let results = bb.test_results(&BTreeSet::new()).unwrap().unwrap();
        assert!(results.targets.is_empty());
        assert!(bb.execute_database_command(&DatabaseCommand::default()).is_err());

        let mut bad = BlackBoxController::new("localhost", ProblemType::Rest);
        assert!(matches!(
            bad.check_connection(),
            Err(DriverError::NotReachable { .. })
        ));
    }
}
