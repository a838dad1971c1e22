//! Seeded randomness shared by every search operator.
//!
//! All sampling, mutation and selection goes through one [`Randomness`]
//! instance so a run is reproducible from its seed: given the same seed,
//! catalog and SUT responses, the same individuals are generated.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const WORD_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

/// Deterministic random source built on `ChaCha8Rng`.
#[derive(Debug, Clone)]
pub struct Randomness {
    rng: ChaCha8Rng,
}

impl Randomness {
    pub fn seeded(seed: u64) -> Self {
        Randomness {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Seeds from the configured value, or from the thread RNG when it is negative.
    pub fn from_config_seed(seed: i64) -> Self {
        if seed < 0 {
            Self::seeded(rand::random())
        } else {
            Self::seeded(seed as u64)
        }
    }

    /// `true` with probability `p`; values outside `[0, 1]` saturate.
    pub fn next_bool(&mut self, p: f64) -> bool {
        if p <= 0.0 || p.is_nan() {
            false
        } else if p >= 1.0 {
            true
        } else {
            self.rng.gen_bool(p)
        }
    }

    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_double(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Standard normal sample (Box-Muller).
    pub fn next_gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Uniform in `[min, max]`, both inclusive. Returns `min` when the range is empty.
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        }
    }

    /// Uniform index into a collection of `len` elements. `len` must be non-zero.
    pub fn next_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len.max(1))
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Picks uniformly among the first `limit` elements of `items`.
    pub fn choose_up_to<'a, T>(&mut self, items: &'a [T], limit: usize) -> Option<&'a T> {
        let k = limit.min(items.len());
        if k == 0 {
            return None;
        }
        items.get(self.rng.gen_range(0..k))
    }

    /// Picks `n` distinct elements, or all of them if there are fewer than `n`.
    pub fn choose_n<T: Clone>(&mut self, items: &[T], n: usize) -> Vec<T> {
        items.choose_multiple(&mut self.rng, n).cloned().collect()
    }

    /// Index chosen proportionally to `weights`. Non-positive weights are never picked.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut point = self.next_double() * total;
        let mut last_positive = None;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            last_positive = Some(i);
            if point < *w {
                return Some(i);
            }
            point -= *w;
        }
        last_positive
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// A character from `[a-zA-Z0-9_]`.
    pub fn next_word_char(&mut self) -> char {
        WORD_CHARS[self.rng.gen_range(0..WORD_CHARS.len())] as char
    }

    /// A word string whose length is uniform in `[min, max]`.
    pub fn next_word_string(&mut self, min: usize, max: usize) -> String {
        let len = self.next_int(min as i64, max.max(min) as i64) as usize;
        (0..len).map(|_| self.next_word_char()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Randomness::seeded(42);
        let mut b = Randomness::seeded(42);
        for _ in 0..50 {
            assert_eq!(a.next_int(-1000, 1000), b.next_int(-1000, 1000));
        }
    }

    #[test]
    fn next_bool_saturates() {
        let mut r = Randomness::seeded(1);
        assert!(!r.next_bool(0.0));
        assert!(!r.next_bool(-3.0));
        assert!(r.next_bool(1.0));
        assert!(r.next_bool(7.0));
    }

    #[test]
    fn choose_up_to_respects_limit() {
        let mut r = Randomness::seeded(3);
        let items = [1, 2, 4, 8, 16, 32];
        for _ in 0..100 {
            let v = *r.choose_up_to(&items, 3).unwrap();
            assert!(v <= 4);
        }
        assert!(r.choose_up_to(&items, 0).is_none());
    }

    #[test]
    fn choose_weighted_skips_zero_weights() {
        let mut r = Randomness::seeded(5);
        for _ in 0..100 {
            let i = r.choose_weighted(&[0.0, 1.0, 0.0, 2.0]).unwrap();
            assert!(i == 1 || i == 3);
        }
        assert!(r.choose_weighted(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn word_string_length_in_bounds() {
        let mut r = Randomness::seeded(9);
        for _ in 0..100 {
            let s = r.next_word_string(2, 6);
            assert!((2..=6).contains(&s.chars().count()));
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }
}
