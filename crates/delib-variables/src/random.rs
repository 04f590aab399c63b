//! Seeded pseudo-random primitives.
//!
//! Every [`SeededRng`] owns its state; there is no process-wide generator.
//! The same seed string always produces the same sequence, across runs and
//! regardless of what else is being resolved concurrently.

use sha2::{Digest, Sha256};

const LCG_A: u64 = 1_664_525;
const LCG_C: u64 = 1_013_904_223;
const LCG_M: u64 = 1 << 32;

/// Linear congruential generator over 32-bit state.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u32,
}

/// Hash a seed string to 32 bits: the first four digest bytes, big-endian.
pub fn hash_seed(seed: &str) -> u32 {
    let digest = Sha256::digest(seed.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(hash_seed(seed))
    }

    fn next_state(&mut self) -> u32 {
        let next = (LCG_A * u64::from(self.state) + LCG_C) % LCG_M;
        self.state = next as u32;
        self.state
    }

    /// Uniform float in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        f64::from(self.next_state()) / LCG_M as f64
    }

    /// Uniform integer in `[min, max]` (inclusive).
    pub fn randint(&mut self, min: usize, max: usize) -> usize {
        debug_assert!(min <= max);
        let span = (max - min + 1) as f64;
        (self.random() * span).floor() as usize + min
    }

    /// Draw `n` distinct items in draw order. `n` is capped at `items.len()`.
    pub fn choices<T: Clone>(&mut self, items: &[T], n: usize) -> Vec<T> {
        let mut pool: Vec<T> = items.to_vec();
        let n = n.min(pool.len());
        let mut picked = Vec::with_capacity(n);
        for _ in 0..n {
            let idx = self.randint(0, pool.len() - 1);
            picked.push(pool.remove(idx));
        }
        picked
    }

    /// A full permutation of `items`.
    pub fn shuffle<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        self.choices(items, items.len())
    }

    /// Index into `items` drawn with probability proportional to `weights`.
    ///
    /// Missing, mismatched or all-zero weights fall back to a uniform draw.
    /// Returns `None` only for an empty slice.
    pub fn weighted_index(&mut self, len: usize, weights: Option<&[u32]>) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let weights = match weights {
            Some(w) if w.len() == len && w.iter().any(|&x| x > 0) => w,
            _ => return Some(self.randint(0, len - 1)),
        };
        let total: u64 = weights.iter().map(|&w| u64::from(w)).sum();
        let position = self.random() * total as f64;
        let mut cumulative = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            cumulative += f64::from(w);
            if position < cumulative {
                return Some(i);
            }
        }
        Some(len - 1)
    }

    pub fn weighted_choice<'a, T>(
        &mut self,
        items: &'a [T],
        weights: Option<&[u32]>,
    ) -> Option<&'a T> {
        self.weighted_index(items.len(), weights).map(|i| &items[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SeededRng::from_seed_str("participant-1");
        let mut b = SeededRng::from_seed_str("participant-1");
        for _ in 0..20 {
            assert_eq!(a.random().to_bits(), b.random().to_bits());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = SeededRng::from_seed_str("alpha");
        let mut b = SeededRng::from_seed_str("beta");
        let xs: Vec<u64> = (0..5).map(|_| a.random().to_bits()).collect();
        let ys: Vec<u64> = (0..5).map(|_| b.random().to_bits()).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn lcg_step_matches_constants() {
        let mut rng = SeededRng::new(0);
        assert_eq!(rng.next_state(), 1_013_904_223);
        let expected = (1_664_525u64 * 1_013_904_223 + 1_013_904_223) % (1 << 32);
        assert_eq!(u64::from(rng.next_state()), expected);
    }

    #[test]
    fn random_stays_in_unit_interval() {
        let mut rng = SeededRng::new(u32::MAX);
        for _ in 0..1000 {
            let x = rng.random();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn randint_is_inclusive() {
        let mut rng = SeededRng::from_seed_str("bounds");
        let mut seen = [false; 3];
        for _ in 0..200 {
            let v = rng.randint(2, 4);
            assert!((2..=4).contains(&v));
            seen[v - 2] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let items = vec!["a", "b", "c", "d", "e"];
        let mut rng = SeededRng::from_seed_str("perm");
        let mut shuffled = rng.shuffle(&items);
        shuffled.sort();
        assert_eq!(shuffled, items);
    }

    #[test]
    fn choices_are_distinct_and_capped() {
        let items = vec![1, 2, 3];
        let mut rng = SeededRng::from_seed_str("x");
        let picked = rng.choices(&items, 2);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0], picked[1]);
        assert_eq!(rng.choices(&items, 10).len(), 3);
        assert!(rng.choices::<i32>(&[], 1).is_empty());
    }

    #[test]
    fn weighted_choice_respects_zero_weight() {
        let items = ["never", "always"];
        let mut rng = SeededRng::from_seed_str("w");
        for _ in 0..100 {
            assert_eq!(rng.weighted_choice(&items, Some(&[0, 5])), Some(&"always"));
        }
    }

    #[test]
    fn weighted_choice_falls_back_to_uniform() {
        let items = ["a", "b"];
        let mut rng = SeededRng::from_seed_str("w");
        assert!(rng.weighted_choice(&items, Some(&[1])).is_some());
        assert!(rng.weighted_choice(&items, Some(&[0, 0])).is_some());
        assert_eq!(rng.weighted_choice::<&str>(&[], None), None);
    }
}
