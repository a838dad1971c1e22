//! Search engine for evorest.
//!
//! Generates test suites for a REST API by evolving sequences of HTTP calls
//! against a running system under test (SUT):
//!
//! - **Configuration** ([`config`]): every tunable of the search, settable by
//!   name and validated as a whole before the run
//! - **Execution** ([`driver`], [`http`], [`rest_fitness`]): SUT control,
//!   HTTP transport and the scoring of one individual
//! - **Archive** ([`archive`], [`fitness_value`], [`solution`]): per-target
//!   populations of the best individuals and the final suite
//! - **Operators** ([`sampler`], [`mutator`], [`structure`], [`resource`]):
//!   sampling, gene and structure mutation, and the resource-dependency model
//! - **Algorithms** ([`algorithms`]): MIO, MOSA, WTS and random search over a
//!   shared [`search::SearchContext`]
//!
//! [`run_search`] wires everything together for one run.

pub mod algorithms;
pub mod archive;
pub mod config;
pub mod driver;
pub mod error;
pub mod evaluated;
pub mod fitness_value;
pub mod http;
pub mod id_mapper;
pub mod mutator;
pub mod resource;
pub mod rest_fitness;
pub mod sampler;
pub mod search;
pub mod solution;
pub mod structure;
pub mod time;

pub use algorithms::{algorithm_for, SearchAlgorithm};
pub use archive::Archive;
pub use config::{Algorithm, ProblemType, SearchConfig};
pub use driver::{BlackBoxController, SutController, SutInfo, TestResults};
pub use error::{ConfigError, DriverError, SearchError, TransportError};
pub use evaluated::EvaluatedIndividual;
pub use fitness_value::FitnessValue;
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use rest_fitness::FitnessStats;
pub use search::SearchContext;
pub use solution::{Solution, SolutionReport};

use evorest_core::{ActionCatalog, DbSchema};

use crate::resource::DependencyEdge;

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub solution: Solution,
    pub report: SolutionReport,
    /// Inferred resource dependencies, when resource sampling was on.
    pub dependencies: Option<Vec<DependencyEdge>>,
    pub stats: FitnessStats,
}

/// Connects to the SUT, runs the configured algorithm until the budget is
/// spent and stops the SUT.
pub fn run_search(
    config: SearchConfig,
    catalog: ActionCatalog,
    schema: Option<DbSchema>,
    driver: Box<dyn SutController>,
    transport: Box<dyn HttpTransport>,
) -> Result<SearchOutcome, SearchError> {
    let mut algorithm = algorithm_for(config.algorithm);
    let mut ctx = SearchContext::new(config, catalog, schema, driver, transport)?;

    let searched = algorithm.search(&mut ctx);
    let stopped = ctx.shutdown();
    let solution = searched?;
    if let Err(e) = stopped {
        tracing::warn!(error = %e, "failed to stop the SUT");
    }

    let stats = ctx.fitness.stats();
    if stats != FitnessStats::default() {
        tracing::info!(
            timeouts = stats.timeouts,
            redirect_loops = stats.redirect_loops,
            failed_db_commands = stats.failed_db_commands,
            large_responses = stats.large_responses,
            "degraded evaluations"
        );
    }
    let dependencies = ctx
        .resources
        .as_ref()
        .filter(|_| ctx.config.export_dependencies)
        .map(|m| m.export_dependencies());

    Ok(SearchOutcome {
        report: solution.report(ctx.fitness.id_mapper()),
        solution,
        dependencies,
        stats,
    })
}
