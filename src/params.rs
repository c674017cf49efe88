//! Scheme parameters and their validation.

use serde::{Deserialize, Serialize};

use crate::error::{HeError, Result};
use crate::modulus::{MAX_MODULUS_BITS, MIN_MODULUS_BITS};

/// Ring degrees accepted by [`SchemeParameters::validate`].
pub const SUPPORTED_DEGREES: [usize; 6] = [1024, 2048, 4096, 8192, 16384, 32768];

/// Bits of the modulus kept free above the scale for message magnitude and noise.
pub const CAPACITY_MARGIN_BITS: f64 = 20.0;

/// Degree, modulus chain and scale of a CKKS context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemeParameters {
    /// Ring degree N (a power of two).
    pub poly_modulus_degree: usize,
    /// Bit size of each prime in the coefficient modulus chain.
    pub coeff_mod_bit_sizes: Vec<u32>,
    /// Δ, the scale plaintexts are encoded at.
    pub global_scale: f64,
}

impl Default for SchemeParameters {
    fn default() -> Self {
        Self {
            poly_modulus_degree: 8192,
            coeff_mod_bit_sizes: vec![60, 40, 40, 60],
            global_scale: 2f64.powi(40),
        }
    }
}

impl SchemeParameters {
    pub fn new(poly_modulus_degree: usize, coeff_mod_bit_sizes: Vec<u32>, global_scale: f64) -> Self {
        Self {
            poly_modulus_degree,
            coeff_mod_bit_sizes,
            global_scale,
        }
    }

    /// Highest level a ciphertext may reach: chain length − 1.
    pub fn max_level(&self) -> usize {
        self.coeff_mod_bit_sizes.len().saturating_sub(1)
    }

    /// Sum of the chain's nominal bit sizes.
    pub fn total_modulus_bits(&self) -> u32 {
        self.coeff_mod_bit_sizes.iter().sum()
    }

    /// Check every parameter; prime availability is checked later by prime selection.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DEGREES.contains(&self.poly_modulus_degree) {
            return Err(HeError::invalid(format!(
                "polynomial modulus degree {} is not one of {SUPPORTED_DEGREES:?}",
                self.poly_modulus_degree
            )));
        }
        if self.coeff_mod_bit_sizes.is_empty() {
            return Err(HeError::invalid("coefficient modulus chain is empty"));
        }
        if let Some(bits) = self
            .coeff_mod_bit_sizes
            .iter()
            .find(|b| !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(*b))
        {
            return Err(HeError::invalid(format!(
                "modulus bit size {bits} outside [{MIN_MODULUS_BITS}, {MAX_MODULUS_BITS}]"
            )));
        }
        if !self.global_scale.is_finite() || self.global_scale < 1.0 {
            return Err(HeError::invalid(format!(
                "global scale {} must be finite and at least 1",
                self.global_scale
            )));
        }
        let budget = f64::from(self.total_modulus_bits()) - CAPACITY_MARGIN_BITS;
        if self.global_scale.log2() >= budget {
            return Err(HeError::invalid(format!(
                "scale of 2^{:.1} leaves no room in a {}-bit modulus",
                self.global_scale.log2(),
                self.total_modulus_bits()
            )));
        }
        Ok(())
    }
}
