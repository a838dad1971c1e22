//! Numeric and boolean genes.

use serde::{Deserialize, Serialize};

use crate::adaptive::AdaptiveControl;
use crate::randomness::Randomness;

/// Powers of two from `2^0` to `2^30`, the step sizes of numeric mutation.
pub(crate) const INT_POW2: [i64; 31] = {
    let mut table = [0i64; 31];
    let mut i = 0;
    while i < 31 {
        table[i] = 1 << i;
        i += 1;
    }
    table
};

/// Picks a power-of-two step no (much) larger than `range`.
///
/// The number of candidate exponents shrinks from `start` to `end` as the
/// budget is consumed, so late mutations take smaller steps.
pub(crate) fn power_of_two_delta(
    rng: &mut Randomness,
    apc: &AdaptiveControl,
    range: i64,
    start: usize,
    end: usize,
) -> i64 {
    let max_index = apc
        .exploratory_int(start as i64, end as i64)
        .clamp(1, INT_POW2.len() as i64) as usize;
    let mut n = 0;
    for (i, step) in INT_POW2.iter().enumerate().take(max_index) {
        n = i + 1;
        if *step > range {
            break;
        }
    }
    rng.choose_up_to(&INT_POW2, n).copied().unwrap_or(1)
}

pub(crate) fn format_double(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        "0".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegerGene {
    pub value: i64,
    pub min: i64,
    pub max: i64,
}

impl IntegerGene {
    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool) {
        if self.min == self.max {
            self.value = self.min;
            return;
        }
        let mut candidate = self.value;
        for _ in 0..10 {
            candidate = if rng.next_bool(0.3) {
                // small values hit more branches than uniform ones over a huge range
                let lo = self.min.max(-100);
                let hi = self.max.min(100);
                if lo <= hi {
                    rng.next_int(lo, hi)
                } else {
                    rng.next_int(self.min, self.max)
                }
            } else {
                rng.next_int(self.min, self.max)
            };
            if !force_new || candidate != self.value {
                break;
            }
        }
        self.value = candidate;
    }

    pub(crate) fn standard_mutation(&mut self, rng: &mut Randomness, apc: &AdaptiveControl) {
        let range = (self.max as i128 - self.min as i128).min(i64::MAX as i128) as i64;
        let delta = power_of_two_delta(rng, apc, range, INT_POW2.len(), 10);
        let sign: i128 = if self.value >= self.max {
            -1
        } else if self.value <= self.min {
            1
        } else if rng.coin() {
            1
        } else {
            -1
        };
        let result = self.value as i128 + sign * delta as i128;
        self.value = result.clamp(self.min as i128, self.max as i128) as i64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleGene {
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DoubleGene {
    pub(crate) fn clamp(&self, v: f64) -> f64 {
        let v = match self.min {
            Some(min) if v < min => min,
            _ => v,
        };
        match self.max {
            Some(max) if v > max => max,
            _ => v,
        }
    }

    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool) {
        let mut candidate = self.value;
        for _ in 0..10 {
            candidate = match (self.min, self.max) {
                (Some(min), Some(max)) => min + rng.next_double() * (max - min),
                _ if rng.coin() => rng.next_double(),
                _ => rng.next_gaussian() * 1000.0,
            };
            candidate = self.clamp(candidate);
            if !force_new || candidate != self.value {
                break;
            }
        }
        self.value = candidate;
    }

    pub(crate) fn standard_mutation(&mut self, rng: &mut Randomness, apc: &AdaptiveControl) {
        let next = match rng.next_index(3) {
            0 => self.value + rng.next_gaussian(),
            1 => {
                let delta = power_of_two_delta(rng, apc, i64::MAX, INT_POW2.len(), 10);
                self.value + rng.next_gaussian() * delta as f64
            }
            _ => {
                let scale = 10f64.powi(rng.next_int(0, 14) as i32);
                (self.value * scale).round_ties_even() / scale
            }
        };
        if next.is_finite() {
            self.value = self.clamp(next);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanGene {
    pub value: bool,
}

impl BooleanGene {
    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool) {
        self.value = if force_new { !self.value } else { rng.coin() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::{Gene, GeneContext, GeneKind};
    use proptest::prelude::*;

    fn int_value(g: &Gene) -> i64 {
        match &g.kind {
            GeneKind::Integer(i) => i.value,
            _ => unreachable!(),
        }
    }

    #[test]
    fn delta_respects_small_range() {
        let mut rng = Randomness::seeded(4);
        let apc = AdaptiveControl::default();
        for _ in 0..200 {
            let d = power_of_two_delta(&mut rng, &apc, 3, INT_POW2.len(), 10);
            assert!(d <= 4, "delta {} too large for range 3", d);
        }
    }

    #[test]
    fn mutation_at_max_moves_down() {
        let mut rng = Randomness::seeded(8);
        let apc = AdaptiveControl::default();
        let mut g = IntegerGene { value: 10, min: 0, max: 10 };
        g.standard_mutation(&mut rng, &apc);
        assert!(g.value < 10);
    }

    #[test]
    fn mutation_at_min_moves_up() {
        let mut rng = Randomness::seeded(8);
        let apc = AdaptiveControl::default();
        let mut g = IntegerGene { value: -5, min: -5, max: 5 };
        g.standard_mutation(&mut rng, &apc);
        assert!(g.value > -5);
    }

    #[test]
    fn rounding_keeps_value_finite() {
        let mut rng = Randomness::seeded(2);
        let apc = AdaptiveControl::default();
        let mut g = DoubleGene { value: 3.14159, min: None, max: None };
        for _ in 0..100 {
            g.standard_mutation(&mut rng, &apc);
            assert!(g.value.is_finite());
        }
    }

    #[test]
    fn bounded_double_stays_in_bounds() {
        let mut rng = Randomness::seeded(3);
        let apc = AdaptiveControl::default();
        let mut g = DoubleGene { value: 0.5, min: Some(0.0), max: Some(1.0) };
        for _ in 0..200 {
            g.standard_mutation(&mut rng, &apc);
            assert!((0.0..=1.0).contains(&g.value));
        }
    }

    proptest! {
        #[test]
        fn integer_mutation_stays_in_bounds(
            seed in any::<u64>(),
            a in -1000i64..1000,
            width in 0i64..2000,
            steps in 1usize..50,
            used in 0.0f64..1.0,
        ) {
            let (min, max) = (a, a + width);
            let mut rng = Randomness::seeded(seed);
            let apc = AdaptiveControl::new(used, 0.5);
            let mut gene = Gene::integer("n", min, max).unwrap();
            gene.randomize(&mut rng, false, &GeneContext::default()).unwrap();
            for _ in 0..steps {
                gene.standard_mutation(&mut rng, &apc, &GeneContext::default()).unwrap();
                let v = int_value(&gene);
                prop_assert!(min <= v && v <= max);
            }
        }

        #[test]
        fn extreme_bounds_never_overflow(seed in any::<u64>(), steps in 1usize..30) {
            let mut rng = Randomness::seeded(seed);
            let apc = AdaptiveControl::default();
            let mut gene = Gene::int64("n");
            gene.randomize(&mut rng, false, &GeneContext::default()).unwrap();
            for _ in 0..steps {
                gene.standard_mutation(&mut rng, &apc, &GeneContext::default()).unwrap();
            }
        }
    }
}
