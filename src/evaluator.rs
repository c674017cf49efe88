//! Polynomial evaluation over a ciphertext.
//!
//! P(x) = a₀ + a₁x + ⋯ + aₙxⁿ is accumulated term by term: the running power of `x`
//! is multiplied by its plaintext coefficient, the partial sum is lifted to the term's
//! level and the two are added. Degree `n` consumes `n − 1` levels; no rescaling is
//! done, so the scale grows by Δ per multiplication.
//!
//! Capacity checks only look at the scale. The encoded magnitude |P(x)|·scale must still
//! stay below half the modulus product or decryption wraps around silently: on the default
//! 8192 / [60, 40, 40, 60] chain a cubic already overflows for inputs near 1e4.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algebra::CkksAlgebra;
use crate::cipher::Ciphertext;
use crate::context::SchemeContext;
use crate::error::{HeError, Result};
use crate::sampling::secure_rng;

/// Scoring polynomial of the loan service: 1000 + 2x − 0.5x².
pub const LOAN_COEFFICIENTS: [f64; 3] = [1000.0, 2.0, -0.5];

/// Validated coefficient list `[a0, …, an]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct PolynomialSpec {
    coefficients: Vec<f64>,
}

impl PolynomialSpec {
    pub fn new(coefficients: Vec<f64>) -> Result<Self> {
        validate_coefficients(&coefficients)?;
        Ok(Self { coefficients })
    }

    /// Named preset; only `loan` is defined.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "loan" => Self::new(LOAN_COEFFICIENTS.to_vec()),
            other => Err(HeError::invalid(format!("unknown polynomial preset {other:?}"))),
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }
}

impl TryFrom<Vec<f64>> for PolynomialSpec {
    type Error = HeError;

    fn try_from(coefficients: Vec<f64>) -> Result<Self> {
        Self::new(coefficients)
    }
}

impl From<PolynomialSpec> for Vec<f64> {
    fn from(spec: PolynomialSpec) -> Self {
        spec.coefficients
    }
}

fn validate_coefficients(coefficients: &[f64]) -> Result<()> {
    if coefficients.is_empty() {
        return Err(HeError::invalid("polynomial has no coefficients"));
    }
    if let Some((i, c)) = coefficients.iter().enumerate().find(|(_, c)| !c.is_finite()) {
        return Err(HeError::invalid(format!("coefficient a{i} = {c} is not finite")));
    }
    Ok(())
}

/// Evaluate `coefficients` on `x` slot-wise.
pub fn evaluate(ctx: &SchemeContext, x: &Ciphertext, coefficients: &[f64]) -> Result<Ciphertext> {
    evaluate_with_rng(ctx, x, coefficients, &mut secure_rng())
}

pub fn evaluate_with_rng<R: RngCore + CryptoRng>(
    ctx: &SchemeContext,
    x: &Ciphertext,
    coefficients: &[f64],
    rng: &mut R,
) -> Result<Ciphertext> {
    validate_coefficients(coefficients)?;
    ctx.check_ciphertext(x)?;
    let degree = coefficients.len() - 1;
    let required = (x.level() + degree).saturating_sub(1);
    if degree > 0 && required > ctx.max_level() {
        return Err(HeError::exhausted(format!(
            "degree {degree} needs level {required}, chain supports {}",
            ctx.max_level()
        )));
    }

    let alg = CkksAlgebra::new(ctx);
    let mut result = ctx.encrypt_constant_with_rng(coefficients[0], x.slots(), rng)?;
    let mut power = x.clone();
    for (i, &a_i) in coefficients.iter().enumerate().skip(1) {
        let term = alg.scalar_mul(&power, a_i)?;
        result = alg.add(&alg.align_level(&result, term.level())?, &term)?;
        if i < degree {
            power = alg.mul(&power, x)?;
        }
    }
    debug!(
        context_id = %ctx.id(),
        degree,
        level = result.level(),
        log2_scale = result.scale().log2(),
        "evaluated polynomial"
    );
    Ok(result)
}

/// Plaintext reference: the same polynomial applied to every value.
pub fn evaluate_plain(coefficients: &[f64], values: &[f64]) -> Result<Vec<f64>> {
    validate_coefficients(coefficients)?;
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(HeError::invalid(format!("non-finite input value {v}")));
    }
    Ok(values
        .iter()
        .map(|&x| coefficients.iter().rev().fold(0.0, |acc, &a| acc * x + a))
        .collect())
}
