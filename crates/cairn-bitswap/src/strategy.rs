//! The send policy: should we satisfy a partner's want right now?
//!
//! The standard strategy flips a coin weighted by a logistic over the debt
//! ratio, so partners we are balanced with (ratio ≤ 1) are served almost
//! always and chronic takers decay toward never. The constants were tuned
//! empirically in the original deployment and are kept as-is.

use rand::Rng;

/// Closed set of send policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Probabilistic, weighted against over-giving.
    #[default]
    Standard,
    /// Always send. For trusted partners under one operator's control.
    YesMan,
}

impl Strategy {
    /// Decide whether to send to a partner with the given debt ratio.
    pub fn should_send(&self, debt_ratio: f64) -> bool {
        match self {
            Self::YesMan => true,
            Self::Standard => rand::thread_rng().gen::<f64>() <= probability_send(debt_ratio),
        }
    }
}

/// `P = 1 − 1/(1 + e^(6 − 3·ratio))`.
///
/// ≈ 1 for ratio ≤ 1, 0.5 at ratio 2, and decays toward 0 beyond that.
pub fn probability_send(ratio: f64) -> f64 {
    let x = 1.0 + (6.0 - 3.0 * ratio).exp();
    1.0 - 1.0 / x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_ratio_is_near_certain() {
        assert!(probability_send(0.0) > 0.99);
        assert!(probability_send(1.0) > 0.95);
    }

    #[test]
    fn ratio_two_is_even_odds() {
        assert!((probability_send(2.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn heavy_debt_decays_toward_zero() {
        assert!(probability_send(4.0) < 0.01);
        assert!(probability_send(10.0) < 1e-6);
    }

    #[test]
    fn probability_is_monotonically_decreasing() {
        let samples: Vec<f64> = (0..40).map(|i| probability_send(i as f64 / 4.0)).collect();
        assert!(samples.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn yesman_always_sends() {
        for _ in 0..100 {
            assert!(Strategy::YesMan.should_send(1000.0));
        }
    }

    #[test]
    fn standard_sends_when_balanced() {
        // P(ratio = 0) ≈ 0.9975; a hundred draws all failing would be
        // astronomically unlikely.
        let sent = (0..100)
            .filter(|_| Strategy::Standard.should_send(0.0))
            .count();
        assert!(sent > 90);
    }
}
