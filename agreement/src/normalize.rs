// Copyright (C) 2025 Noah Cashin <noahc959@icloud.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logits -> probability distribution.
//!
//! Softmax is max-shifted before exponentiation so logits in the millions stay
//! finite. After normalization every entry is raised to a floor and the vector
//! renormalized, so an underflowed probability is tiny but never zero.

use crate::error::{Result, ScoreError};

/// Smallest positive normal `f64`. Keeps ratios strictly positive without
/// measurably moving any probability that did not underflow.
pub const DEFAULT_PROBABILITY_FLOOR: f64 = f64::MIN_POSITIVE;

/// Probabilities over the vocabulary; non-negative, sums to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    probs: Vec<f64>,
}

impl Distribution {
    /// Stable softmax with a probability floor. `p_floor` must lie in
    /// `(0, 1/logits.len())`.
    pub fn from_logits(logits: &[f32], p_floor: f64) -> Result<Self> {
        if logits.is_empty() { return Err(degenerate("empty logits vector")); }
        check_floor(p_floor, logits.len())?;
        let mut max = f32::NEG_INFINITY;
        for &v in logits { if v > max || v.is_nan() { max = v; } }
        if !max.is_finite() {
            return Err(degenerate(format!("maximum logit is {max}")));
        }

        let mut probs: Vec<f64> = logits.iter().map(|&v| ((v as f64) - (max as f64)).exp()).collect();
        let sum: f64 = probs.iter().sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(degenerate(format!("normalizing sum is {sum}")));
        }
        for p in probs.iter_mut() { *p /= sum; }

        for p in probs.iter_mut() { *p = p.max(p_floor); }
        let norm: f64 = probs.iter().sum();
        for p in probs.iter_mut() { *p /= norm; }
        Ok(Self { probs })
    }

    pub fn len(&self) -> usize { self.probs.len() }
    pub fn is_empty(&self) -> bool { self.probs.is_empty() }
    pub fn probs(&self) -> &[f64] { &self.probs }
    pub fn get(&self, id: u32) -> Option<f64> { self.probs.get(id as usize).copied() }

    /// Index of the largest probability; the first one wins ties.
    pub fn argmax(&self) -> u32 { argmax(&self.probs) as u32 }
}

/// Leftmost index of the maximum. Strict `>` keeps the earliest of equal values.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0usize;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] { best = i; }
    }
    best
}

/// Accepts `0 < p_floor < 1/vocab_size`.
pub fn check_floor(p_floor: f64, vocab_size: usize) -> Result<()> {
    let ceiling = 1.0 / vocab_size as f64;
    if p_floor > 0.0 && p_floor < ceiling { Ok(()) } else {
        Err(ScoreError::InvalidProbabilityFloor { floor: p_floor, vocab_size })
    }
}

fn degenerate(reason: impl Into<String>) -> ScoreError {
    ScoreError::NumericDegenerate { position: 0, reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(d: &Distribution) -> f64 { d.probs().iter().sum() }

    #[test]
    fn softmax_sums_to_one() {
        let d = Distribution::from_logits(&[1.0, 2.0, 3.0, -4.0], DEFAULT_PROBABILITY_FLOOR).unwrap();
        assert!((sum(&d) - 1.0).abs() < 1e-12);
        assert!(d.probs().iter().all(|&p| p >= 0.0));
        assert_eq!(d.argmax(), 2);
    }

    #[test]
    fn huge_logits_stay_finite() {
        let d = Distribution::from_logits(&[1e6, 0.0, -1e6, 1e6 - 1.0], DEFAULT_PROBABILITY_FLOOR).unwrap();
        assert!(d.probs().iter().all(|p| p.is_finite()));
        assert!((sum(&d) - 1.0).abs() < 1e-12);
        assert_eq!(d.argmax(), 0);
        // underflowed entries are floored, not zero
        assert!(d.get(1).unwrap() > 0.0);
        assert!(d.get(2).unwrap() > 0.0);
    }

    #[test]
    fn underflow_lands_on_the_floor() {
        let d = Distribution::from_logits(&[1e6, 0.0], DEFAULT_PROBABILITY_FLOOR).unwrap();
        assert_eq!(d.get(1), Some(DEFAULT_PROBABILITY_FLOOR));
        assert_eq!(d.get(0), Some(1.0));
    }

    #[test]
    fn floor_outside_open_range_is_rejected() {
        // 4 entries: the floor must stay below 0.25
        for floor in [0.0, -1e-9, 0.25, 0.5, f64::NAN, f64::INFINITY] {
            match Distribution::from_logits(&[1.0, 2.0, 3.0, 4.0], floor) {
                Err(ScoreError::InvalidProbabilityFloor { vocab_size, .. }) => assert_eq!(vocab_size, 4),
                other => panic!("floor {floor} should be rejected, got {other:?}"),
            }
        }
        assert!(Distribution::from_logits(&[1.0, 2.0, 3.0, 4.0], 0.2499).is_ok());
        assert!(Distribution::from_logits(&[1.0, 2.0, 3.0, 4.0], f64::MIN_POSITIVE).is_ok());
    }

    #[test]
    fn uniform_logits_give_equal_probabilities() {
        let d = Distribution::from_logits(&[0.25; 8], DEFAULT_PROBABILITY_FLOOR).unwrap();
        let first = d.probs()[0];
        assert!(d.probs().iter().all(|&p| p == first));
        assert_eq!(d.argmax(), 0);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.1, 0.4, 0.1, 0.4]), 1);
        assert_eq!(argmax(&[0.3, 0.3]), 0);
        let d = Distribution::from_logits(&[0.0, 5.0, 5.0, 1.0], DEFAULT_PROBABILITY_FLOOR).unwrap();
        assert_eq!(d.argmax(), 1);
    }

    #[test]
    fn degenerate_logits_are_rejected() {
        for bad in [vec![], vec![f32::NEG_INFINITY; 3], vec![0.0, f32::NAN], vec![f32::INFINITY, 0.0]] {
            match Distribution::from_logits(&bad, DEFAULT_PROBABILITY_FLOOR) {
                Err(ScoreError::NumericDegenerate { .. }) => {}
                other => panic!("expected NumericDegenerate for {bad:?}, got {other:?}"),
            }
        }
    }
}
