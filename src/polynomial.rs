//! RNS polynomials in Z_Q[X]/(X^N + 1), Q = q_0 · q_1 ⋯ q_{L-1}.
//!
//! A polynomial is stored as one residue vector ("limb") per chain prime, either in
//! coefficient form or in NTT evaluation form. Addition works in both forms; products
//! are pointwise and require evaluation form.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use itertools::izip;
use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::modulus::{add_mod, inv_mod, mul_mod, neg_mod, reduce_i128, sub_mod};
use crate::ntt::NttTable;

/// Domain a polynomial's limbs are expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    /// Plain coefficients.
    Coefficient,
    /// Negacyclic NTT evaluations (bit-reversed order).
    Evaluation,
}

/// Polynomial with one residue limb per chain prime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnsPoly {
    pub limbs: Vec<Vec<u64>>,
    pub moduli: Vec<u64>,
    pub representation: Representation,
}

impl RnsPoly {
    /// Zero polynomial.
    pub fn zero(moduli: &[u64], degree: usize, representation: Representation) -> Self {
        Self {
            limbs: vec![vec![0u64; degree]; moduli.len()],
            moduli: moduli.to_vec(),
            representation,
        }
    }

    /// Coefficient-form polynomial from signed coefficients (padded with zeros to `degree`).
    pub fn from_signed(coeffs: &[i128], moduli: &[u64], degree: usize) -> Self {
        assert!(coeffs.len() <= degree, "too many coefficients for ring degree");
        let limbs = moduli
            .iter()
            .map(|&q| {
                let mut limb = vec![0u64; degree];
                for (dst, &c) in limb.iter_mut().zip(coeffs) {
                    *dst = reduce_i128(c, q);
                }
                limb
            })
            .collect();
        Self {
            limbs,
            moduli: moduli.to_vec(),
            representation: Representation::Coefficient,
        }
    }

    /// Ring degree N.
    pub fn degree(&self) -> usize {
        self.limbs.first().map_or(0, Vec::len)
    }

    /// True when the polynomial has exactly one limb of `degree` residues per modulus
    /// and every residue is reduced. Used to vet deserialized material.
    pub fn is_well_formed(&self, moduli: &[u64], degree: usize) -> bool {
        self.moduli == moduli
            && self.limbs.len() == moduli.len()
            && self
                .limbs
                .iter()
                .zip(moduli)
                .all(|(limb, &q)| limb.len() == degree && limb.iter().all(|&c| c < q))
    }

    /// Multiply limb `i` by `scalars[i]`.
    pub fn mul_scalar_limbs(&self, scalars: &[u64]) -> Self {
        assert_eq!(scalars.len(), self.moduli.len(), "one scalar per limb");
        let limbs = izip!(&self.limbs, &self.moduli, scalars)
            .map(|(limb, &q, &s)| limb.iter().map(|&c| mul_mod(c, s, q)).collect())
            .collect();
        Self {
            limbs,
            moduli: self.moduli.clone(),
            representation: self.representation,
        }
    }

    /// Multiply by a signed integer constant.
    pub fn mul_integer(&self, k: i128) -> Self {
        let scalars: Vec<u64> = self.moduli.iter().map(|&q| reduce_i128(k, q)).collect();
        self.mul_scalar_limbs(&scalars)
    }

    /// Apply X → X^galois (coefficient form only); `galois` must be odd and below 2N.
    pub fn automorphism(&self, galois: usize) -> Self {
        assert_eq!(
            self.representation,
            Representation::Coefficient,
            "automorphism needs coefficient form"
        );
        let n = self.degree();
        let two_n = 2 * n;
        let limbs = self
            .limbs
            .iter()
            .zip(&self.moduli)
            .map(|(limb, &q)| {
                let mut out = vec![0u64; n];
                for (k, &c) in limb.iter().enumerate() {
                    let idx = (k * galois) % two_n;
                    if idx < n {
                        out[idx] = c;
                    } else {
                        out[idx - n] = neg_mod(c, q);
                    }
                }
                out
            })
            .collect();
        Self {
            limbs,
            moduli: self.moduli.clone(),
            representation: Representation::Coefficient,
        }
    }

    /// Gadget decomposition for key switching (coefficient form only).
    ///
    /// For limb `i` the residue `[c]_{q_i}` is split into `base_bits`-wide digits; digit
    /// `(i, t)` is returned as a polynomial whose every limb holds that small digit. The
    /// order is limb-major, matching [`digit_count`].
    pub fn decompose(&self, base_bits: u32) -> Vec<RnsPoly> {
        assert_eq!(
            self.representation,
            Representation::Coefficient,
            "decomposition needs coefficient form"
        );
        let mask = (1u64 << base_bits) - 1;
        let mut digits = Vec::new();
        for (limb, &q_i) in self.limbs.iter().zip(&self.moduli) {
            for t in 0..digit_count(q_i, base_bits) {
                let shift = base_bits * t as u32;
                let small: Vec<u64> = limb.iter().map(|&c| (c >> shift) & mask).collect();
                let limbs = self
                    .moduli
                    .iter()
                    .map(|&q_j| small.iter().map(|&d| d % q_j).collect())
                    .collect();
                digits.push(RnsPoly {
                    limbs,
                    moduli: self.moduli.clone(),
                    representation: Representation::Coefficient,
                });
            }
        }
        digits
    }

    fn assert_compatible(&self, rhs: &RnsPoly) {
        assert_eq!(self.moduli, rhs.moduli, "moduli must match");
        assert_eq!(self.representation, rhs.representation, "representations must match");
    }
}

/// Number of `base_bits`-wide digits needed to cover residues of `q`.
pub fn digit_count(q: u64, base_bits: u32) -> usize {
    let bits = 64 - q.leading_zeros();
    ((bits + base_bits - 1) / base_bits) as usize
}

impl<'a, 'b> Add<&'b RnsPoly> for &'a RnsPoly {
    type Output = RnsPoly;
    fn add(self, rhs: &'b RnsPoly) -> RnsPoly {
        self.assert_compatible(rhs);
        let limbs = izip!(&self.limbs, &rhs.limbs, &self.moduli)
            .map(|(a, b, &q)| a.iter().zip(b).map(|(&x, &y)| add_mod(x, y, q)).collect())
            .collect();
        RnsPoly {
            limbs,
            moduli: self.moduli.clone(),
            representation: self.representation,
        }
    }
}

impl Add<&RnsPoly> for RnsPoly {
    type Output = RnsPoly;
    fn add(self, rhs: &RnsPoly) -> RnsPoly {
        &self + rhs
    }
}

impl AddAssign<&RnsPoly> for RnsPoly {
    fn add_assign(&mut self, rhs: &RnsPoly) {
        self.assert_compatible(rhs);
        for (a, b, &q) in izip!(&mut self.limbs, &rhs.limbs, &self.moduli) {
            for (x, &y) in a.iter_mut().zip(b) {
                *x = add_mod(*x, y, q);
            }
        }
    }
}

impl<'a, 'b> Sub<&'b RnsPoly> for &'a RnsPoly {
    type Output = RnsPoly;
    fn sub(self, rhs: &'b RnsPoly) -> RnsPoly {
        self.assert_compatible(rhs);
        let limbs = izip!(&self.limbs, &rhs.limbs, &self.moduli)
            .map(|(a, b, &q)| a.iter().zip(b).map(|(&x, &y)| sub_mod(x, y, q)).collect())
            .collect();
        RnsPoly {
            limbs,
            moduli: self.moduli.clone(),
            representation: self.representation,
        }
    }
}

impl Sub<&RnsPoly> for RnsPoly {
    type Output = RnsPoly;
    fn sub(self, rhs: &RnsPoly) -> RnsPoly {
        &self - rhs
    }
}

impl<'a, 'b> Mul<&'b RnsPoly> for &'a RnsPoly {
    type Output = RnsPoly;

    /// Pointwise product; both operands must be in evaluation form.
    fn mul(self, rhs: &'b RnsPoly) -> RnsPoly {
        self.assert_compatible(rhs);
        assert_eq!(
            self.representation,
            Representation::Evaluation,
            "products need evaluation form"
        );
        let limbs = izip!(&self.limbs, &rhs.limbs, &self.moduli)
            .map(|(a, b, &q)| a.iter().zip(b).map(|(&x, &y)| mul_mod(x, y, q)).collect())
            .collect();
        RnsPoly {
            limbs,
            moduli: self.moduli.clone(),
            representation: Representation::Evaluation,
        }
    }
}

impl Mul<&RnsPoly> for RnsPoly {
    type Output = RnsPoly;
    fn mul(self, rhs: &RnsPoly) -> RnsPoly {
        &self * rhs
    }
}

impl Neg for &RnsPoly {
    type Output = RnsPoly;
    fn neg(self) -> RnsPoly {
        let limbs = self
            .limbs
            .iter()
            .zip(&self.moduli)
            .map(|(a, &q)| a.iter().map(|&x| neg_mod(x, q)).collect())
            .collect();
        RnsPoly {
            limbs,
            moduli: self.moduli.clone(),
            representation: self.representation,
        }
    }
}

impl Neg for RnsPoly {
    type Output = RnsPoly;
    fn neg(self) -> RnsPoly {
        -&self
    }
}

/// CRT constants for lifting residues back to integers modulo Q.
#[derive(Clone, Debug)]
struct CrtBasis {
    modulus: BigUint,
    q_hat: Vec<BigUint>,
    q_hat_inv: Vec<u64>,
}

impl CrtBasis {
    fn new(moduli: &[u64]) -> Self {
        let modulus = moduli
            .iter()
            .fold(BigUint::from(1u8), |acc, &q| acc * BigUint::from(q));
        let q_hat: Vec<BigUint> = moduli.iter().map(|&q| &modulus / BigUint::from(q)).collect();
        let q_hat_inv = moduli
            .iter()
            .enumerate()
            .map(|(i, &q)| {
                let residue = moduli
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .fold(1u64, |acc, (_, &q_j)| mul_mod(acc, q_j % q, q));
                inv_mod(residue, q)
            })
            .collect();
        Self {
            modulus,
            q_hat,
            q_hat_inv,
        }
    }
}

/// Ring context: chain primes, their NTT tables and CRT constants.
#[derive(Clone, Debug)]
pub struct RnsRing {
    degree: usize,
    moduli: Vec<u64>,
    tables: Vec<NttTable>,
    crt: CrtBasis,
}

impl RnsRing {
    /// Build the ring for `degree` over the given NTT-friendly primes.
    pub fn new(degree: usize, moduli: &[u64]) -> Self {
        let tables = moduli.iter().map(|&q| NttTable::new(q, degree)).collect();
        Self {
            degree,
            moduli: moduli.to_vec(),
            tables,
            crt: CrtBasis::new(moduli),
        }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn moduli(&self) -> &[u64] {
        &self.moduli
    }

    /// log2(Q): total bits available for scale and payload.
    pub fn capacity_bits(&self) -> f64 {
        self.moduli.iter().map(|&q| (q as f64).log2()).sum()
    }

    pub fn zero(&self, representation: Representation) -> RnsPoly {
        RnsPoly::zero(&self.moduli, self.degree, representation)
    }

    /// Coefficient-form polynomial from signed coefficients.
    pub fn from_signed(&self, coeffs: &[i128]) -> RnsPoly {
        RnsPoly::from_signed(coeffs, &self.moduli, self.degree)
    }

    /// Convert to evaluation form in place (no-op if already there).
    pub fn to_evaluation(&self, poly: &mut RnsPoly) {
        if poly.representation == Representation::Evaluation {
            return;
        }
        for (limb, (table, &q)) in poly.limbs.iter_mut().zip(self.tables.iter().zip(&poly.moduli)) {
            debug_assert_eq!(table.modulus(), q);
            table.forward(limb);
        }
        poly.representation = Representation::Evaluation;
    }

    /// Convert to coefficient form in place (no-op if already there).
    pub fn to_coefficient(&self, poly: &mut RnsPoly) {
        if poly.representation == Representation::Coefficient {
            return;
        }
        for (limb, table) in poly.limbs.iter_mut().zip(&self.tables) {
            table.inverse(limb);
        }
        poly.representation = Representation::Coefficient;
    }

    /// Owned evaluation-form copy.
    pub fn evaluation(&self, mut poly: RnsPoly) -> RnsPoly {
        self.to_evaluation(&mut poly);
        poly
    }

    /// Lift every coefficient to its centered representative in (−Q/2, Q/2] and divide by
    /// `scale`. The polynomial must be in coefficient form.
    pub fn reconstruct_scaled(&self, poly: &RnsPoly, scale: f64) -> Vec<f64> {
        assert_eq!(
            poly.representation,
            Representation::Coefficient,
            "reconstruction needs coefficient form"
        );
        let modulus = BigInt::from(self.crt.modulus.clone());
        let half: BigInt = &modulus / 2;
        (0..self.degree)
            .map(|k| {
                let mut acc = BigUint::zero();
                for (i, &q) in self.moduli.iter().enumerate() {
                    let y = mul_mod(poly.limbs[i][k], self.crt.q_hat_inv[i], q);
                    acc += &self.crt.q_hat[i] * y;
                }
                let centered: BigInt = (BigInt::from(acc) + &half).mod_floor(&modulus) - &half;
                centered.to_f64().unwrap_or(f64::NAN) / scale
            })
            .collect()
    }
}
