//! Randomized attack sequences.
//!
//! A sequence interleaves training references (unrestricted indices) with a
//! single target index. Positions are drawn independently so no fixed period
//! exists for an optimizer or predictor to lock onto.

use crate::util::Rng;
use log::debug;

/// Generator of attack sequences over an unrestricted region of size `U`.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    rng: Rng,
    unrestricted: usize,
}

impl SequenceGenerator {
    /// Creates a generator drawing from `rng`.
    ///
    /// # Panics
    ///
    /// Panics if `unrestricted` is zero.
    pub fn new(rng: Rng, unrestricted: usize) -> Self {
        assert!(unrestricted > 0, "unrestricted region must be non-empty");
        SequenceGenerator { rng, unrestricted }
    }

    /// Length of a generated sequence, `(train_ratio + 1) * repetitions`, or
    /// `None` if it does not fit a `usize`.
    pub fn sequence_len(train_ratio: usize, repetitions: usize) -> Option<usize> {
        train_ratio.checked_add(1)?.checked_mul(repetitions)
    }

    /// Generates a sequence of `(train_ratio + 1) * repetitions` indices.
    ///
    /// For each position a draw `d` from `[0, train_ratio]` emits `d % U` if
    /// `d < train_ratio` and `target` otherwise, so the expected target rate
    /// is `1 / (train_ratio + 1)`.
    ///
    /// # Panics
    ///
    /// Panics if the length overflows; see [`SequenceGenerator::sequence_len`].
    pub fn generate(&mut self, train_ratio: usize, target: usize, repetitions: usize) -> Vec<usize> {
        let Some(len) = Self::sequence_len(train_ratio, repetitions) else {
            panic!(
                "sequence of ({} + 1) * {} entries overflows usize",
                train_ratio, repetitions
            );
        };
        let seq: Vec<usize> = (0..len)
            .map(|_| {
                let draw = self.rng.up_to(train_ratio);
                if draw < train_ratio {
                    draw % self.unrestricted
                } else {
                    target
                }
            })
            .collect();
        debug!(
            "Generated attack sequence of {} entries, {} targeting {}",
            len,
            seq.iter().filter(|&&i| i == target).count(),
            target
        );
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_length() {
        let mut generator = SequenceGenerator::new(Rng::from_seed(1), 10);
        for (ratio, reps) in [(0, 5), (1, 1), (9, 13), (1000, 3)] {
            assert_eq!(generator.generate(ratio, 10, reps).len(), (ratio + 1) * reps);
        }
        assert!(generator.generate(5, 10, 0).is_empty());
    }

    #[test]
    fn test_entries_are_training_or_target() {
        let mut generator = SequenceGenerator::new(Rng::from_seed(2), 10);
        let seq = generator.generate(50, 15, 100);
        assert!(seq.iter().all(|&i| i < 10 || i == 15));
    }

    #[test]
    fn test_zero_ratio_is_all_target() {
        let mut generator = SequenceGenerator::new(Rng::from_seed(3), 10);
        assert!(generator.generate(0, 12, 50).iter().all(|&i| i == 12));
    }

    #[test]
    fn test_target_rate_converges() {
        let mut generator = SequenceGenerator::new(Rng::from_seed(4), 10);
        let ratio = 9;
        let mut hits = 0usize;
        let mut total = 0usize;
        for _ in 0..200 {
            let seq = generator.generate(ratio, 10, 500);
            hits += seq.iter().filter(|&&i| i == 10).count();
            total += seq.len();
        }
        let rate = hits as f64 / total as f64;
        let expected = 1.0 / (ratio + 1) as f64;
        assert!(
            (rate - expected).abs() < 0.005,
            "rate {rate} too far from {expected}"
        );
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = SequenceGenerator::new(Rng::from_seed(9), 10).generate(20, 11, 30);
        let b = SequenceGenerator::new(Rng::from_seed(9), 10).generate(20, 11, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sequence_len_overflow() {
        assert_eq!(SequenceGenerator::sequence_len(9, 13), Some(130));
        assert_eq!(SequenceGenerator::sequence_len(usize::MAX, 1), None);
        assert_eq!(SequenceGenerator::sequence_len(usize::MAX / 2, 3), None);
        assert_eq!(SequenceGenerator::sequence_len(usize::MAX, 0), None);
    }

    #[test]
    #[should_panic(expected = "overflows usize")]
    fn test_generate_rejects_overflowing_length() {
        SequenceGenerator::new(Rng::from_seed(1), 10).generate(usize::MAX, 10, 1);
    }
}
