//! Many Independent Objectives.
//!
//! Each step either samples a new individual (always while ad-hoc probes
//! remain or the archive is empty, otherwise with a probability that decays
//! to zero at the start of the focused phase) or takes an archived
//! individual and mutates it a budget-dependent number of times.

use crate::error::SearchError;
use crate::search::SearchContext;

use super::SearchAlgorithm;

#[derive(Debug, Clone, Default)]
pub struct Mio {
    focused: bool,
}

impl SearchAlgorithm for Mio {
    fn name(&self) -> &'static str {
        "MIO"
    }

    fn search_once(&mut self, ctx: &mut SearchContext) -> Result<(), SearchError> {
        let apc = ctx.time.adaptive();
        if apc.is_focused() && !self.focused {
            self.focused = true;
            tracing::info!(
                used_budget = ctx.time.percentage_used_budget(),
                covered = ctx.archive.number_of_covered_targets(),
                "switching to focused search"
            );
        }

        let random_probability = apc.exploratory_f64(ctx.config.prob_of_random_sampling, 0.0);
        if ctx.archive.is_empty() || ctx.sampler.has_ad_hoc() || ctx.rng.next_bool(random_probability) {
            ctx.sample_and_archive()?;
            return Ok(());
        }

        let Some(current) = ctx.archive.sample_individual(&mut ctx.rng) else {
            ctx.sample_and_archive()?;
            return Ok(());
        };
        let times = ctx.number_of_mutations().max(1);
        ctx.mutate_and_save(times, current)?;
        Ok(())
    }
}
