//! Canonical-embedding encoder.
//!
//! A vector of `s` reals (padded to a power of two) is placed in the sub-ring
//! Z[X^{N/2s}] and mapped to coefficients with the "special" FFT over the roots
//! ζ^{5^j}, ζ = exp(πi/N). Slot `j` is the evaluation at ζ^{5^j}, so the
//! automorphism X → X^{5^r} rotates the slots left by `r`.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

use crate::error::{HeError, Result};

/// Galois generator of the slot rotation group.
pub const GALOIS_GENERATOR: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn scale(self, s: f64) -> Self {
        Self::new(self.re * s, self.im * s)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// Precomputed roots and rotation group for one ring degree.
#[derive(Clone, Debug)]
pub struct Encoder {
    degree: usize,
    rot_group: Vec<usize>,
    ksi_pows: Vec<Complex>,
}

impl Encoder {
    pub fn new(degree: usize) -> Self {
        let m = 2 * degree;
        let half = degree / 2;
        let mut rot_group = Vec::with_capacity(half);
        let mut five_pow = 1usize;
        for _ in 0..half {
            rot_group.push(five_pow);
            five_pow = (five_pow * GALOIS_GENERATOR) % m;
        }
        let ksi_pows = (0..=m)
            .map(|j| {
                let angle = 2.0 * PI * (j % m) as f64 / m as f64;
                Complex::new(angle.cos(), angle.sin())
            })
            .collect();
        Self {
            degree,
            rot_group,
            ksi_pows,
        }
    }

    /// Largest number of values one ciphertext can carry (N/2).
    pub fn max_slots(&self) -> usize {
        self.degree / 2
    }

    /// Encode `values` at `scale` into signed integer coefficients (length N).
    pub fn encode(&self, values: &[f64], scale: f64) -> Result<Vec<i128>> {
        if values.is_empty() {
            return Err(HeError::invalid("cannot encode an empty vector"));
        }
        if values.len() > self.max_slots() {
            return Err(HeError::invalid(format!(
                "{} values exceed the {} available slots",
                values.len(),
                self.max_slots()
            )));
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            return Err(HeError::invalid(format!("non-finite input value {v}")));
        }

        let slots = values.len().next_power_of_two();
        let gap = self.max_slots() / slots;
        let mut uvals: Vec<Complex> = values.iter().map(|&v| Complex::new(v, 0.0)).collect();
        uvals.resize(slots, Complex::default());
        self.fft_special_inv(&mut uvals);

        let mut coeffs = vec![0i128; self.degree];
        for (i, u) in uvals.iter().enumerate() {
            let idx = i * gap;
            coeffs[idx] = to_integer(u.re * scale)?;
            coeffs[idx + self.max_slots()] = to_integer(u.im * scale)?;
        }
        Ok(coeffs)
    }

    /// Decode `slots` values from coefficients that were already divided by the scale.
    pub fn decode(&self, coeffs: &[f64], slots: usize) -> Vec<f64> {
        debug_assert_eq!(coeffs.len(), self.degree);
        let padded = slots.next_power_of_two();
        let gap = self.max_slots() / padded;
        let mut vals: Vec<Complex> = (0..padded)
            .map(|i| {
                let idx = i * gap;
                Complex::new(coeffs[idx], coeffs[idx + self.max_slots()])
            })
            .collect();
        self.fft_special(&mut vals);
        vals.into_iter().take(slots).map(|c| c.re).collect()
    }

    fn fft_special(&self, vals: &mut [Complex]) {
        let size = vals.len();
        let m = 2 * self.degree;
        bit_reverse(vals);
        let mut len = 2;
        while len <= size {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (self.rot_group[j] % lenq) * m / lenq;
                    let u = vals[i + j];
                    let v = vals[i + j + lenh] * self.ksi_pows[idx];
                    vals[i + j] = u + v;
                    vals[i + j + lenh] = u - v;
                }
            }
            len <<= 1;
        }
    }

    fn fft_special_inv(&self, vals: &mut [Complex]) {
        let size = vals.len();
        let m = 2 * self.degree;
        let mut len = size;
        while len >= 1 {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (lenq - (self.rot_group[j] % lenq)) * m / lenq;
                    let u = vals[i + j] + vals[i + j + lenh];
                    let v = (vals[i + j] - vals[i + j + lenh]) * self.ksi_pows[idx];
                    vals[i + j] = u;
                    vals[i + j + lenh] = v;
                }
            }
            len >>= 1;
        }
        bit_reverse(vals);
        let inv = 1.0 / size as f64;
        for v in vals.iter_mut() {
            *v = v.scale(inv);
        }
    }
}

fn bit_reverse(vals: &mut [Complex]) {
    let size = vals.len();
    let mut j = 0usize;
    for i in 1..size {
        let mut bit = size >> 1;
        while j >= bit {
            j -= bit;
            bit >>= 1;
        }
        j += bit;
        if i < j {
            vals.swap(i, j);
        }
    }
}

fn to_integer(x: f64) -> Result<i128> {
    let r = x.round();
    if !r.is_finite() || r.abs() >= 2f64.powi(120) {
        return Err(HeError::invalid("encoded magnitude exceeds the coefficient range"));
    }
    Ok(r as i128)
}
