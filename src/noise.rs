//! Gaussian perturbation for values released in plaintext.

use rand::{CryptoRng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{HeError, Result};
use crate::sampling::secure_rng;

/// Sensitivity and privacy parameter of one release.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    pub sensitivity: f64,
    pub epsilon: f64,
}

impl NoiseParams {
    pub fn new(sensitivity: f64, epsilon: f64) -> Result<Self> {
        let params = Self {
            sensitivity,
            epsilon,
        };
        params.std_dev()?;
        Ok(params)
    }

    /// σ = sensitivity / epsilon.
    pub fn std_dev(&self) -> Result<f64> {
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(HeError::invalid(format!("epsilon {} must be positive", self.epsilon)));
        }
        if !self.sensitivity.is_finite() || self.sensitivity < 0.0 {
            return Err(HeError::invalid(format!(
                "sensitivity {} must be non-negative",
                self.sensitivity
            )));
        }
        Ok(self.sensitivity / self.epsilon)
    }
}

/// Add independent N(0, (sensitivity/epsilon)²) noise to every value, drawing from a
/// freshly seeded generator.
pub fn add_noise(values: &[f64], sensitivity: f64, epsilon: f64) -> Result<Vec<f64>> {
    add_noise_with_rng(values, NoiseParams { sensitivity, epsilon }, &mut secure_rng())
}

pub fn add_noise_with_rng<R: RngCore + CryptoRng>(
    values: &[f64],
    params: NoiseParams,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let sigma = params.std_dev()?;
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(HeError::invalid(format!("non-finite value {v}")));
    }
    if sigma == 0.0 {
        return Ok(values.to_vec());
    }
    let normal = Normal::new(0.0, sigma).map_err(|e| HeError::invalid(e.to_string()))?;
    Ok(values.iter().map(|&v| v + normal.sample(rng)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_std_dev_matches_calibration() {
        let values = vec![10.0; 20_000];
        let noised = add_noise(&values, 2.0, 0.5).unwrap();
        let n = noised.len() as f64;
        let mean = noised.iter().sum::<f64>() / n;
        let var = noised.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let expected = 2.0 / 0.5;
        assert!((var.sqrt() - expected).abs() < 0.1 * expected, "std {}", var.sqrt());
        assert!((mean - 10.0).abs() < 0.2, "mean {mean}");
    }

    #[test]
    fn test_zero_sensitivity_is_identity() {
        let values = [1.0, 2.0];
        assert_eq!(add_noise(&values, 0.0, 1.0).unwrap(), values);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        for (s, e) in [(1.0, 0.0), (1.0, -1.0), (-1.0, 1.0), (f64::NAN, 1.0), (1.0, f64::INFINITY)] {
            assert_eq!(add_noise(&[1.0], s, e).unwrap_err().kind(), ErrorKind::InvalidParameters);
        }
        assert!(add_noise(&[f64::NAN], 1.0, 1.0).is_err());
        assert!(NoiseParams::new(1.0, 0.0).is_err());
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let params = NoiseParams::new(1.0, 1.0).unwrap();
        let a = add_noise_with_rng(&[0.0; 4], params, &mut ChaCha20Rng::seed_from_u64(1)).unwrap();
        let b = add_noise_with_rng(&[0.0; 4], params, &mut ChaCha20Rng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().any(|&v| v != 0.0));
    }
}
