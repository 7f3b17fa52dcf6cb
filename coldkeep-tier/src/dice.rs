//! Seeded, replayable randomness for the simulated backends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of fault decisions derived from a seed and a shared draw counter.
///
/// Every draw advances the counter, so two backends built from the same seed
/// and driven through the same calls make identical decisions. Clones share
/// the counter.
#[derive(Debug, Clone)]
pub(crate) struct SeededDice {
    seed: u64,
    draws: Arc<AtomicU64>,
}

impl SeededDice {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) const fn seed(&self) -> u64 {
        self.seed
    }

    /// Advances the draw counter, returning its previous value.
    pub(crate) fn next_draw(&self) -> u64 {
        self.draws.fetch_add(1, Ordering::Relaxed)
    }

    fn mix(&self, multiplier: u64) -> u64 {
        self.seed.wrapping_add(self.next_draw()).wrapping_mul(multiplier)
    }

    /// Returns true with probability `rate`. Rates outside (0, 1) never draw.
    pub(crate) fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        #[allow(clippy::cast_precision_loss)]
        let unit = self.mix(0x5851_f42d_4c95_7f2d) as f64 / u64::MAX as f64;
        unit < rate
    }

    /// Picks an index in `0..len`. `len` must be non-zero.
    pub(crate) fn pick(&self, len: usize) -> usize {
        debug_assert!(len > 0);
        #[allow(clippy::cast_possible_truncation)]
        let raw = self.mix(0xc6a4_a793_5bd1_e995) as usize;
        raw % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_draws() {
        let a = SeededDice::new(7);
        let b = SeededDice::new(7);
        let first: Vec<_> = (0..32).map(|_| a.roll(0.5)).collect();
        let second: Vec<_> = (0..32).map(|_| b.roll(0.5)).collect();
        assert_eq!(first, second);
        assert!(first.iter().any(|x| *x));
        assert!(first.iter().any(|x| !*x));
    }

    #[test]
    fn test_extreme_rates_do_not_draw() {
        let dice = SeededDice::new(1);
        assert!(!dice.roll(0.0));
        assert!(dice.roll(1.0));
        assert_eq!(dice.next_draw(), 0);
    }

    #[test]
    fn test_clones_share_counter() {
        let dice = SeededDice::new(3);
        let clone = dice.clone();
        clone.next_draw();
        assert_eq!(dice.next_draw(), 1);
        assert!(dice.pick(5) < 5);
    }
}
