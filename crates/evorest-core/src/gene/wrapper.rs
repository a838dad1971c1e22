//! Wrapper genes that change how their inner gene takes part in the search.

use serde::{Deserialize, Serialize};

use super::{Gene, GeneContext};
use crate::adaptive::AdaptiveControl;
use crate::error::CoreError;
use crate::randomness::Randomness;

/// Chance that mutating an active optional switches it off.
const DEACTIVATION_PROBABILITY: f64 = 0.01;

/// A gene that may be left out entirely (e.g. an optional query parameter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalGene {
    pub inner: Box<Gene>,
    pub active: bool,
}

impl OptionalGene {
    pub(crate) fn randomize(
        &mut self,
        rng: &mut Randomness,
        force_new: bool,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        self.active = rng.coin();
        if self.inner.is_mutable() {
            self.inner.randomize(rng, force_new, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn standard_mutation(
        &mut self,
        rng: &mut Randomness,
        apc: &AdaptiveControl,
        ctx: &GeneContext,
    ) -> Result<(), CoreError> {
        if !self.active {
            self.active = true;
        } else if !self.inner.is_mutable() || rng.next_bool(DEACTIVATION_PROBABILITY) {
            self.active = false;
        } else {
            self.inner.standard_mutation(rng, apc, ctx)?;
        }
        Ok(())
    }
}

/// A gene whose selection for mutation is additionally gated by `probability`.
///
/// Used for values that easily break a call when changed, such as ids that
/// were just bound to a created resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptiveGene {
    pub inner: Box<Gene>,
    pub probability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::GeneKind;

    #[test]
    fn inactive_optional_is_activated_by_mutation() {
        let mut rng = Randomness::seeded(1);
        let apc = AdaptiveControl::default();
        let mut g = OptionalGene {
            inner: Box::new(Gene::int32("q")),
            active: false,
        };
        g.standard_mutation(&mut rng, &apc, &GeneContext::default())
            .unwrap();
        assert!(g.active);
    }

    #[test]
    fn active_optional_usually_mutates_inner() {
        let mut rng = Randomness::seeded(2);
        let apc = AdaptiveControl::default();
        let mut g = OptionalGene {
            inner: Box::new(Gene::boolean("b")),
            active: true,
        };
        let mut deactivated = 0;
        for _ in 0..100 {
            g.active = true;
            g.standard_mutation(&mut rng, &apc, &GeneContext::default())
                .unwrap();
            if !g.active {
                deactivated += 1;
            }
        }
        assert!(deactivated < 20);
        assert!(matches!(g.inner.kind, GeneKind::Boolean(_)));
    }
}
