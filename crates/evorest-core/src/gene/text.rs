//! String and enum genes.

use serde::{Deserialize, Serialize};

use super::number::power_of_two_delta;
use super::GeneContext;
use crate::adaptive::AdaptiveControl;
use crate::randomness::Randomness;

/// Fresh strings are kept short even when the declared maximum is large.
const MAX_RANDOMIZED_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringGene {
    pub value: String,
    pub min_length: usize,
    pub max_length: usize,
}

impl StringGene {
    fn len(&self) -> usize {
        self.value.chars().count()
    }

    /// Sets the value, truncating or padding it into the length bounds.
    pub(crate) fn assign(&mut self, value: &str) {
        let mut chars: Vec<char> = value.chars().take(self.max_length).collect();
        while chars.len() < self.min_length {
            chars.push('_');
        }
        self.value = chars.into_iter().collect();
    }

    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool) {
        let upper = self
            .max_length
            .min(self.min_length.saturating_add(MAX_RANDOMIZED_LENGTH));
        let mut candidate = self.value.clone();
        for _ in 0..10 {
            candidate = rng.next_word_string(self.min_length, upper);
            if !force_new || candidate != self.value || upper == 0 {
                break;
            }
        }
        self.value = candidate;
    }

    pub(crate) fn standard_mutation(
        &mut self,
        rng: &mut Randomness,
        apc: &AdaptiveControl,
        ctx: &GeneContext,
    ) {
        let p = rng.next_double();
        let len = self.len();

        if p < 0.02 {
            let others: Vec<&String> = ctx
                .string_pool
                .iter()
                .filter(|s| **s != self.value)
                .filter(|s| (self.min_length..=self.max_length).contains(&s.chars().count()))
                .collect();
            if let Some(other) = rng.choose(&others) {
                self.value = (*other).clone();
                return;
            }
        }

        let can_pop = len > self.min_length;
        let can_insert = len < self.max_length;
        if p < 0.8 && len > 0 {
            self.shift_char(rng, apc, len);
        } else if p < 0.9 && can_pop {
            self.value.pop();
        } else if can_insert {
            self.insert_char(rng, len);
        } else if can_pop {
            self.value.pop();
        } else if len > 0 {
            self.shift_char(rng, apc, len);
        }
    }

    /// Moves one character by a power-of-two code distance. A shift clamped
    /// to no change goes the other way.
    fn shift_char(&mut self, rng: &mut Randomness, apc: &AdaptiveControl, len: usize) {
        let mut chars: Vec<char> = self.value.chars().collect();
        let i = rng.next_index(len);
        let delta = power_of_two_delta(rng, apc, i64::MAX, 6, 3).max(1);
        let current = chars[i] as i64;
        let sign = if rng.coin() { 1 } else { -1 };
        let mut code = (current + sign * delta).clamp(0x20, 0xD7FF);
        if code == current {
            code = (current - sign * delta).clamp(0x20, 0xD7FF);
        }
        chars[i] = char::from_u32(code as u32).unwrap_or('_');
        self.value = chars.into_iter().collect();
    }

    fn insert_char(&mut self, rng: &mut Randomness, len: usize) {
        let c = rng.next_word_char();
        if rng.next_bool(0.8) {
            self.value.push(c);
        } else {
            let mut chars: Vec<char> = self.value.chars().collect();
            let at = rng.next_int(0, len as i64) as usize;
            chars.insert(at, c);
            self.value = chars.into_iter().collect();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumGene {
    pub values: Vec<String>,
    pub index: usize,
}

impl EnumGene {
    pub fn current(&self) -> &str {
        self.values
            .get(self.index)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Selects `value` if it is one of the allowed values.
    pub(crate) fn select(&mut self, value: &str) -> bool {
        match self.values.iter().position(|v| v == value) {
            Some(i) => {
                self.index = i;
                true
            }
            None => false,
        }
    }

    pub(crate) fn randomize(&mut self, rng: &mut Randomness, force_new: bool) {
        let n = self.values.len();
        if n <= 1 {
            self.index = 0;
            return;
        }
        if force_new {
            let shift = rng.next_int(1, n as i64 - 1) as usize;
            self.index = (self.index + shift) % n;
        } else {
            self.index = rng.next_index(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gene::{Gene, GeneKind};
    use proptest::prelude::*;

    fn string_len(g: &Gene) -> usize {
        match &g.kind {
            GeneKind::String(s) => s.value.chars().count(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn randomized_strings_are_short_words() {
        let mut rng = Randomness::seeded(6);
        let mut g = StringGene {
            value: String::new(),
            min_length: 0,
            max_length: 10_000,
        };
        for _ in 0..50 {
            g.randomize(&mut rng, true);
            assert!(g.value.chars().count() <= MAX_RANDOMIZED_LENGTH);
        }
    }

    #[test]
    fn sibling_values_can_be_reused() {
        let mut rng = Randomness::seeded(10);
        let apc = AdaptiveControl::default();
        let ctx = GeneContext {
            string_pool: vec!["shared-token".to_string()],
            primary_keys: vec![],
        };
        let mut reused = false;
        for _ in 0..2000 {
            let mut g = StringGene {
                value: "abc".to_string(),
                min_length: 0,
                max_length: 50,
            };
            g.standard_mutation(&mut rng, &apc, &ctx);
            if g.value == "shared-token" {
                reused = true;
                break;
            }
        }
        assert!(reused);
    }

    #[test]
    fn enum_force_new_changes_value() {
        let mut rng = Randomness::seeded(12);
        let mut e = EnumGene {
            values: vec!["A".into(), "B".into(), "C".into()],
            index: 1,
        };
        for _ in 0..20 {
            let before = e.index;
            e.randomize(&mut rng, true);
            assert_ne!(before, e.index);
        }
    }

    #[test]
    fn assign_pads_and_truncates() {
        let mut g = StringGene {
            value: String::new(),
            min_length: 3,
            max_length: 5,
        };
        g.assign("a");
        assert_eq!(g.value, "a__");
        g.assign("abcdefgh");
        assert_eq!(g.value, "abcde");
    }

    #[test]
    fn mutation_always_changes_the_value() {
        let mut rng = Randomness::seeded(8);
        let apc = AdaptiveControl::default();
        let ctx = GeneContext::default();
        let cases = [("abcd", 4, 4), ("    ", 0, 4), ("\u{D7FF}", 1, 1), ("ab", 0, 2)];
        for (value, min_length, max_length) in cases {
            for _ in 0..200 {
                let mut g = StringGene {
                    value: value.to_string(),
                    min_length,
                    max_length,
                };
                g.standard_mutation(&mut rng, &apc, &ctx);
                assert_ne!(g.value, value, "bounds {}..={}", min_length, max_length);
            }
        }
    }

    proptest! {
        #[test]
        fn string_mutation_respects_length(
            seed in any::<u64>(),
            min in 0usize..5,
            extra in 0usize..10,
            steps in 1usize..60,
        ) {
            let max = min + extra;
            let mut rng = Randomness::seeded(seed);
            let apc = AdaptiveControl::default();
            let ctx = GeneContext {
                string_pool: vec!["x".repeat(max + 3), "ok".to_string()],
                primary_keys: vec![],
            };
            let mut gene = Gene::string_bounded("s", min, max).unwrap();
            gene.randomize(&mut rng, false, &ctx).unwrap();
            for _ in 0..steps {
                if gene.is_mutable() {
                    gene.standard_mutation(&mut rng, &apc, &ctx).unwrap();
                }
                let len = string_len(&gene);
                prop_assert!(min <= len && len <= max);
            }
        }
    }
}
