//! Word-sized prime moduli for the RNS chain and the modular helpers built on them.
//!
//! Every chain prime is below 2^60, so sums of two residues never overflow a `u64`
//! and products are reduced through `u128`.

use crate::error::{HeError, Result};

/// Smallest accepted bit size for a chain prime.
pub const MIN_MODULUS_BITS: u32 = 20;
/// Largest accepted bit size for a chain prime.
pub const MAX_MODULUS_BITS: u32 = 60;

const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

#[inline]
pub fn add_mod(a: u64, b: u64, q: u64) -> u64 {
    let s = a + b;
    if s >= q {
        s - q
    } else {
        s
    }
}

#[inline]
pub fn sub_mod(a: u64, b: u64, q: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + q - b
    }
}

#[inline]
pub fn neg_mod(a: u64, q: u64) -> u64 {
    if a == 0 {
        0
    } else {
        q - a
    }
}

#[inline]
pub fn mul_mod(a: u64, b: u64, q: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(q)) as u64
}

/// `base^exp mod q` by square-and-multiply.
pub fn pow_mod(base: u64, mut exp: u64, q: u64) -> u64 {
    let mut result = 1u64 % q;
    let mut base = base % q;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, q);
        }
        base = mul_mod(base, base, q);
        exp >>= 1;
    }
    result
}

/// Inverse modulo a prime `q` (Fermat).
pub fn inv_mod(x: u64, q: u64) -> u64 {
    pow_mod(x, q - 2, q)
}

/// Reduce a signed value into `[0, q)`.
#[inline]
pub fn reduce_i128(value: i128, q: u64) -> u64 {
    value.rem_euclid(i128::from(q)) as u64
}

/// Precomputed Shoup companion `floor(w * 2^64 / q)` for a fixed multiplicand `w`.
#[inline]
pub fn shoup(w: u64, q: u64) -> u64 {
    ((u128::from(w) << 64) / u128::from(q)) as u64
}

/// `a * w mod q` using the Shoup companion of `w`.
#[inline]
pub fn mul_shoup(a: u64, w: u64, w_shoup: u64, q: u64) -> u64 {
    let hi = ((u128::from(a) * u128::from(w_shoup)) >> 64) as u64;
    let r = a.wrapping_mul(w).wrapping_sub(hi.wrapping_mul(q));
    if r >= q {
        r - q
    } else {
        r
    }
}

/// Deterministic Miller-Rabin for the full `u64` range.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut r = 0u32;
    while d % 2 == 0 {
        d /= 2;
        r += 1;
    }
    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Select one distinct prime `q ≡ 1 (mod 2·degree)` of exactly the requested bit length
/// per entry of `bit_sizes`, largest candidates first.
pub fn ntt_primes(bit_sizes: &[u32], degree: usize) -> Result<Vec<u64>> {
    let step = 2 * degree as u64;
    let mut primes: Vec<u64> = Vec::with_capacity(bit_sizes.len());

    for &bits in bit_sizes {
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&bits) {
            return Err(HeError::invalid(format!(
                "modulus bit size {bits} outside [{MIN_MODULUS_BITS}, {MAX_MODULUS_BITS}]"
            )));
        }
        let upper = 1u64 << bits;
        let lower = 1u64 << (bits - 1);
        let mut candidate = ((upper - 1) / step) * step + 1;
        let found = loop {
            if candidate <= lower {
                break None;
            }
            if !primes.contains(&candidate) && is_prime(candidate) {
                break Some(candidate);
            }
            candidate -= step;
        };
        match found {
            Some(q) => primes.push(q),
            None => {
                return Err(HeError::invalid(format!(
                    "no unused {bits}-bit prime congruent to 1 mod {step}"
                )))
            }
        }
    }
    Ok(primes)
}
