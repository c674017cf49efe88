//! Key material: ternary secret, RLWE public key and key-switching keys.
//!
//! Key switching uses a per-limb gadget: the residue of a polynomial modulo `q_i` is
//! cut into [`DECOMPOSITION_BITS`]-wide digits, and digit `(i, t)` is paired with an
//! RLWE sample hiding `s' · 2^{t·w}` in limb `i` only. Summing digit × key over all
//! digits yields `c · s'` in every limb plus a small error.

use std::collections::BTreeMap;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::encoding::GALOIS_GENERATOR;
use crate::error::{HeError, Result};
use crate::modulus::{pow_mod, reduce_i128};
use crate::polynomial::{digit_count, Representation, RnsPoly, RnsRing};
use crate::sampling::{gaussian, small_poly, ternary, uniform};

/// Width of one key-switching digit.
pub const DECOMPOSITION_BITS: u32 = 12;

/// Ternary secret key, kept in both signed-coefficient and evaluation form.
#[derive(Clone, Debug)]
pub struct SecretKey {
    coeffs: Vec<i64>,
    poly: RnsPoly,
}

impl SecretKey {
    pub fn generate<R: RngCore + CryptoRng>(ring: &RnsRing, rng: &mut R) -> Self {
        let coeffs = ternary(ring.degree(), rng);
        Self::from_coeffs(ring, coeffs)
    }

    /// Rebuild from stored coefficients; every coefficient must be in {-1, 0, 1}.
    pub fn try_from_coeffs(ring: &RnsRing, coeffs: Vec<i64>) -> Result<Self> {
        if coeffs.len() != ring.degree() || coeffs.iter().any(|c| !(-1..=1).contains(c)) {
            return Err(HeError::DeserializationError(
                "secret key is not a ternary polynomial of the ring degree".into(),
            ));
        }
        Ok(Self::from_coeffs(ring, coeffs))
    }

    fn from_coeffs(ring: &RnsRing, coeffs: Vec<i64>) -> Self {
        let poly = small_poly(ring, &coeffs);
        Self { coeffs, poly }
    }

    pub fn coeffs(&self) -> &[i64] {
        &self.coeffs
    }

    /// Evaluation-form secret.
    pub fn poly(&self) -> &RnsPoly {
        &self.poly
    }
}

/// RLWE public key `(b, a) = (-(a·s + e), a)`, evaluation form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub b: RnsPoly,
    pub a: RnsPoly,
}

impl PublicKey {
    pub fn generate<R: RngCore + CryptoRng>(ring: &RnsRing, sk: &SecretKey, rng: &mut R) -> Self {
        let (b, a) = rlwe_sample(ring, sk, rng);
        Self { b, a }
    }

    pub fn is_well_formed(&self, ring: &RnsRing) -> bool {
        [&self.b, &self.a].iter().all(|p| {
            p.representation == Representation::Evaluation
                && p.is_well_formed(ring.moduli(), ring.degree())
        })
    }
}

/// Fresh `(-(a·s + e), a)` with uniform `a` and Gaussian `e`.
fn rlwe_sample<R: RngCore + CryptoRng>(
    ring: &RnsRing,
    sk: &SecretKey,
    rng: &mut R,
) -> (RnsPoly, RnsPoly) {
    let a = uniform(ring, rng);
    let e = small_poly(ring, &gaussian(ring.degree(), rng));
    let b = -(&(&a * sk.poly()) + &e);
    (b, a)
}

/// Gadget encryptions of some `s'` under `s`, one `(b, a)` pair per digit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySwitchingKey {
    pub parts: Vec<(RnsPoly, RnsPoly)>,
}

impl KeySwitchingKey {
    /// Key switching `s_prime` (evaluation form) to `sk`.
    pub fn generate<R: RngCore + CryptoRng>(
        ring: &RnsRing,
        sk: &SecretKey,
        s_prime: &RnsPoly,
        rng: &mut R,
    ) -> Self {
        let moduli = ring.moduli();
        let mut parts = Vec::with_capacity(expected_digits(moduli));
        for (i, &q_i) in moduli.iter().enumerate() {
            for t in 0..digit_count(q_i, DECOMPOSITION_BITS) {
                let power = reduce_i128(1i128 << (DECOMPOSITION_BITS as usize * t), q_i);
                let gadget: Vec<u64> = (0..moduli.len())
                    .map(|j| if j == i { power } else { 0 })
                    .collect();
                let (mut b, a) = rlwe_sample(ring, sk, rng);
                b += &s_prime.mul_scalar_limbs(&gadget);
                parts.push((b, a));
            }
        }
        Self { parts }
    }

    /// Relinearization key: switches `s²` back to `s`.
    pub fn relinearization<R: RngCore + CryptoRng>(ring: &RnsRing, sk: &SecretKey, rng: &mut R) -> Self {
        let s_squared = sk.poly() * sk.poly();
        Self::generate(ring, sk, &s_squared, rng)
    }

    /// Galois key for a left rotation by `step` slots: switches `s(X^g)` back to `s`.
    pub fn galois<R: RngCore + CryptoRng>(
        ring: &RnsRing,
        sk: &SecretKey,
        step: i64,
        rng: &mut R,
    ) -> Self {
        let g = galois_element(step, ring.degree());
        let wide: Vec<i128> = sk.coeffs().iter().map(|&c| i128::from(c)).collect();
        let rotated = ring.evaluation(ring.from_signed(&wide).automorphism(g));
        Self::generate(ring, sk, &rotated, rng)
    }

    /// Switch `poly` (coefficient form) to the key: returns `(Σ d·b, Σ d·a)` in
    /// evaluation form.
    pub fn apply(&self, ring: &RnsRing, poly: &RnsPoly) -> (RnsPoly, RnsPoly) {
        let digits = poly.decompose(DECOMPOSITION_BITS);
        assert_eq!(digits.len(), self.parts.len(), "digit count must match key");
        let mut acc0 = ring.zero(Representation::Evaluation);
        let mut acc1 = ring.zero(Representation::Evaluation);
        for (digit, (b, a)) in digits.into_iter().zip(&self.parts) {
            let digit = ring.evaluation(digit);
            acc0 += &(&digit * b);
            acc1 += &(&digit * a);
        }
        (acc0, acc1)
    }

    pub fn is_well_formed(&self, ring: &RnsRing) -> bool {
        self.parts.len() == expected_digits(ring.moduli())
            && self.parts.iter().all(|(b, a)| {
                [b, a].iter().all(|p| {
                    p.representation == Representation::Evaluation
                        && p.is_well_formed(ring.moduli(), ring.degree())
                })
            })
    }
}

/// Galois keys indexed by normalised rotation step.
pub type GaloisKeys = BTreeMap<usize, KeySwitchingKey>;

/// Number of key-switching digits for a modulus chain.
pub fn expected_digits(moduli: &[u64]) -> usize {
    moduli.iter().map(|&q| digit_count(q, DECOMPOSITION_BITS)).sum()
}

/// Rotation step reduced into `[0, N/2)`; negative steps rotate right.
pub fn normalize_step(step: i64, degree: usize) -> usize {
    step.rem_euclid((degree / 2) as i64) as usize
}

/// `5^step mod 2N`, the automorphism index of a left rotation by `step`.
pub fn galois_element(step: i64, degree: usize) -> usize {
    let two_n = 2 * degree as u64;
    pow_mod(GALOIS_GENERATOR as u64, normalize_step(step, degree) as u64, two_n) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulus::ntt_primes;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (RnsRing, SecretKey, ChaCha20Rng) {
        let ring = RnsRing::new(64, &ntt_primes(&[50, 40], 64).unwrap());
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sk = SecretKey::generate(&ring, &mut rng);
        (ring, sk, rng)
    }

    fn max_centered(ring: &RnsRing, mut p: RnsPoly) -> f64 {
        ring.to_coefficient(&mut p);
        ring.reconstruct_scaled(&p, 1.0)
            .into_iter()
            .fold(0.0, |m, c| f64::max(m, c.abs()))
    }

    #[test]
    fn test_public_key_hides_small_error() {
        let (ring, sk, mut rng) = setup();
        let pk = PublicKey::generate(&ring, &sk, &mut rng);
        assert!(pk.is_well_formed(&ring));
        // b + a·s = -e
        let residual = &pk.b + &(&pk.a * sk.poly());
        assert!(max_centered(&ring, residual) <= 20.0);
    }

    #[test]
    fn test_key_switching_recovers_product() {
        let (ring, sk, mut rng) = setup();
        let rlk = KeySwitchingKey::relinearization(&ring, &sk, &mut rng);
        assert!(rlk.is_well_formed(&ring));
        assert_eq!(rlk.parts.len(), expected_digits(ring.moduli()));

        let c = uniform(&ring, &mut rng);
        let mut c_coeff = c.clone();
        ring.to_coefficient(&mut c_coeff);
        let (k0, k1) = rlk.apply(&ring, &c_coeff);
        // k0 + k1·s ≈ c·s²
        let s2 = sk.poly() * sk.poly();
        let diff = &(&k0 + &(&k1 * sk.poly())) - &(&c * &s2);
        let bound = 64.0 * 20.0 * f64::from(1u32 << DECOMPOSITION_BITS) * 10.0;
        assert!(max_centered(&ring, diff) < bound);
    }

    #[test]
    fn test_secret_key_roundtrip_checks_ternary() {
        let (ring, sk, _) = setup();
        let restored = SecretKey::try_from_coeffs(&ring, sk.coeffs().to_vec()).unwrap();
        assert_eq!(restored.poly(), sk.poly());
        let mut bad = sk.coeffs().to_vec();
        bad[0] = 2;
        assert!(SecretKey::try_from_coeffs(&ring, bad).is_err());
        assert!(SecretKey::try_from_coeffs(&ring, vec![0; 32]).is_err());
    }

    #[test]
    fn test_galois_element() {
        assert_eq!(galois_element(0, 1024), 1);
        assert_eq!(galois_element(1, 1024), 5);
        assert_eq!(galois_element(2, 1024), 25);
        // 5 has order N/2 modulo 2N, so -1 and N/2 - 1 coincide.
        assert_eq!(galois_element(-1, 1024), galois_element(511, 1024));
        assert_eq!(normalize_step(-1, 1024), 511);
    }
}
