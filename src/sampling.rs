//! Randomness for key material, encryption and noise.
//!
//! All production entry points draw from a ChaCha20 stream seeded by the operating
//! system; tests inject their own seeded generator through the `*_with_rng` variants.

use rand::{rngs::OsRng, CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::polynomial::{Representation, RnsPoly, RnsRing};

/// Standard deviation of the RLWE error distribution.
pub const ERROR_STD_DEV: f64 = 3.2;
/// Gaussian samples beyond this many standard deviations are redrawn.
const ERROR_TAIL_CUT: f64 = 6.0;

/// Fresh ChaCha20 generator seeded from the operating system.
pub fn secure_rng() -> ChaCha20Rng {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    ChaCha20Rng::from_seed(seed)
}

/// Ternary coefficients in {-1, 0, 1}, uniformly.
pub fn ternary<R: RngCore + CryptoRng>(degree: usize, rng: &mut R) -> Vec<i64> {
    (0..degree).map(|_| rng.gen_range(-1i64..=1)).collect()
}

/// Rounded Gaussian coefficients with the RLWE error width.
pub fn gaussian<R: RngCore + CryptoRng>(degree: usize, rng: &mut R) -> Vec<i64> {
    (0..degree)
        .map(|_| loop {
            let z: f64 = StandardNormal.sample(rng);
            if z.abs() <= ERROR_TAIL_CUT {
                break (z * ERROR_STD_DEV).round() as i64;
            }
        })
        .collect()
}

/// Uniform polynomial; each limb is sampled independently in `[0, q_i)`.
///
/// Returned in evaluation form: a uniform vector is uniform in either domain.
pub fn uniform<R: RngCore + CryptoRng>(ring: &RnsRing, rng: &mut R) -> RnsPoly {
    let mut poly = ring.zero(Representation::Evaluation);
    for (limb, &q) in poly.limbs.iter_mut().zip(ring.moduli()) {
        for c in limb.iter_mut() {
            *c = rng.gen_range(0..q);
        }
    }
    poly
}

/// Small signed coefficients lifted into the ring, in evaluation form.
pub fn small_poly(ring: &RnsRing, coeffs: &[i64]) -> RnsPoly {
    let wide: Vec<i128> = coeffs.iter().map(|&c| i128::from(c)).collect();
    ring.evaluation(ring.from_signed(&wide))
}
