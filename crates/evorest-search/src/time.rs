//! Budget bookkeeping for the search loop.

use std::time::{Duration, Instant};

use evorest_core::AdaptiveControl;

use crate::config::{SearchConfig, StoppingCriterion};

/// Tracks consumed budget and answers "should the search go on?".
#[derive(Debug, Clone)]
pub struct SearchTimeController {
    criterion: StoppingCriterion,
    max_action_evaluations: u64,
    max_time: Duration,
    focused_threshold: f64,
    started: Option<Instant>,
    evaluated_individuals: u64,
    evaluated_actions: u64,
    last_improvement: u64,
}

impl SearchTimeController {
    pub fn new(config: &SearchConfig) -> Self {
        SearchTimeController {
            criterion: config.stopping_criterion,
            max_action_evaluations: u64::from(config.max_action_evaluations),
            max_time: Duration::from_secs(u64::from(config.max_time_in_seconds)),
            focused_threshold: config.focused_search_activation_time,
            started: None,
            evaluated_individuals: 0,
            evaluated_actions: 0,
            last_improvement: 0,
        }
    }

    pub fn start_search(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn should_continue_search(&self) -> bool {
        self.percentage_used_budget() < 1.0
    }

    /// Fraction of the budget used so far, capped at 1.
    pub fn percentage_used_budget(&self) -> f64 {
        let used = match self.criterion {
            StoppingCriterion::FitnessEvaluations => {
                self.evaluated_actions as f64 / self.max_action_evaluations.max(1) as f64
            }
            StoppingCriterion::Time => {
                self.elapsed().as_secs_f64() / self.max_time.as_secs_f64().max(f64::EPSILON)
            }
        };
        used.min(1.0)
    }

    /// Parameter control snapshot for the operators.
    pub fn adaptive(&self) -> AdaptiveControl {
        AdaptiveControl::new(self.percentage_used_budget(), self.focused_threshold)
    }

    /// Accounts one fitness evaluation that executed `actions` actions.
    pub fn new_evaluation(&mut self, actions: usize) {
        self.evaluated_individuals += 1;
        self.evaluated_actions += actions as u64;
    }

    /// Records that the archive improved at the current point of the budget.
    pub fn report_improvement(&mut self) {
        self.last_improvement = self.evaluated_actions;
    }

    pub fn evaluated_individuals(&self) -> u64 {
        self.evaluated_individuals
    }

    pub fn evaluated_actions(&self) -> u64 {
        self.evaluated_actions
    }

    /// Action evaluations spent when the archive last improved.
    pub fn last_improvement(&self) -> u64 {
        self.last_improvement
    }
}
