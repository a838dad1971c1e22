//! Generation loops.
//!
//! Every algorithm shares the sampler, mutator, fitness evaluator and archive
//! of a [`SearchContext`]; they differ only in how one step of the search is
//! organised. The loop stops when the budget is spent, and the solution is
//! always extracted from the archive.

mod mio;
mod mosa;
mod random;
mod wts;

pub use mio::Mio;
pub use mosa::Mosa;
pub use random::RandomSearch;
pub use wts::Wts;

use crate::config::Algorithm;
use crate::error::SearchError;
use crate::search::SearchContext;
use crate::solution::Solution;

pub trait SearchAlgorithm {
    fn name(&self) -> &'static str;

    /// Runs before the first step, once the budget clock started.
    fn setup(&mut self, _ctx: &mut SearchContext) -> Result<(), SearchError> {
        Ok(())
    }

    /// One step of the generation loop.
    fn search_once(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError>;

    fn search(&mut self, ctx: &mut SearchContext) -> Result<Solution, SearchError> {
        ctx.time.start_search();
        tracing::info!(algorithm = self.name(), "search started");
        self.setup(ctx)?;
        while ctx.time.should_continue_search() {
            self.search_once(ctx)?;
        }
        tracing::info!(
            algorithm = self.name(),
            covered = ctx.archive.number_of_covered_targets(),
            reached = ctx.archive.number_of_reached_targets(),
            evaluated_individuals = ctx.time.evaluated_individuals(),
            evaluated_actions = ctx.time.evaluated_actions(),
            "search finished"
        );
        Ok(ctx.solution())
    }
}

pub fn algorithm_for(kind: Algorithm) -> Box<dyn SearchAlgorithm> {
    match kind {
        Algorithm::Mio => Box::new(Mio::default()),
        Algorithm::Random => Box::new(RandomSearch),
        Algorithm::Wts => Box::new(Wts::default()),
        Algorithm::Mosa => Box::new(Mosa::default()),
    }
}
