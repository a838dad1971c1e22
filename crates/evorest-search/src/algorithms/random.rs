use crate::error::SearchError;
use crate::search::SearchContext;

use super::SearchAlgorithm;

/// Samples and evaluates new individuals only; the archive keeps the best.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSearch;

impl SearchAlgorithm for RandomSearch {
    fn name(&self) -> &'static str {
        "RANDOM"
    }

    fn search_once(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        ctx.sample_and_archive()?;
        Ok(())
    }
}
