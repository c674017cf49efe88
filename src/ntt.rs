//! Negacyclic number-theoretic transform over one chain prime.
//!
//! Forward transform is Cooley-Tukey with the 2N-th root ψ merged into the butterflies,
//! so pointwise products in the transformed domain are products in Z_q[X]/(X^N + 1).
//! Output of `forward` is in bit-reversed order; `inverse` consumes that order.

use crate::modulus::{add_mod, inv_mod, mul_mod, mul_shoup, neg_mod, pow_mod, shoup, sub_mod};

/// Twiddle tables for one prime and one ring degree.
#[derive(Clone, Debug)]
pub struct NttTable {
    q: u64,
    degree: usize,
    psi_rev: Vec<u64>,
    psi_rev_shoup: Vec<u64>,
    psi_inv_rev: Vec<u64>,
    psi_inv_rev_shoup: Vec<u64>,
    n_inv: u64,
    n_inv_shoup: u64,
}

impl NttTable {
    /// Build tables; `q` must be prime with `q ≡ 1 (mod 2·degree)` and `degree` a power of two.
    pub fn new(q: u64, degree: usize) -> Self {
        assert!(degree.is_power_of_two() && degree >= 2, "degree must be a power of two");
        assert_eq!((q - 1) % (2 * degree as u64), 0, "q must be 1 mod 2N");

        let log_n = degree.trailing_zeros();
        let psi = find_psi(q, degree);
        let psi_inv = inv_mod(psi, q);

        let mut psi_rev = vec![0u64; degree];
        let mut psi_inv_rev = vec![0u64; degree];
        let mut pow = 1u64;
        let mut pow_inv = 1u64;
        for i in 0..degree {
            let r = bit_reverse_index(i, log_n);
            psi_rev[r] = pow;
            psi_inv_rev[r] = pow_inv;
            pow = mul_mod(pow, psi, q);
            pow_inv = mul_mod(pow_inv, psi_inv, q);
        }
        let psi_rev_shoup = psi_rev.iter().map(|&w| shoup(w, q)).collect();
        let psi_inv_rev_shoup = psi_inv_rev.iter().map(|&w| shoup(w, q)).collect();
        let n_inv = inv_mod(degree as u64, q);

        Self {
            q,
            degree,
            psi_rev,
            psi_rev_shoup,
            psi_inv_rev,
            psi_inv_rev_shoup,
            n_inv,
            n_inv_shoup: shoup(n_inv, q),
        }
    }

    /// Prime this table was built for.
    pub fn modulus(&self) -> u64 {
        self.q
    }

    /// In-place forward transform (coefficients → evaluations, bit-reversed).
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.degree);
        let q = self.q;
        let n = self.degree;
        let mut t = n;
        let mut m = 1;
        while m < n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let s = self.psi_rev[m + i];
                let s_shoup = self.psi_rev_shoup[m + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = mul_shoup(a[j + t], s, s_shoup, q);
                    a[j] = add_mod(u, v, q);
                    a[j + t] = sub_mod(u, v, q);
                }
            }
            m <<= 1;
        }
    }

    /// In-place inverse transform (bit-reversed evaluations → coefficients).
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.degree);
        let q = self.q;
        let n = self.degree;
        let mut t = 1;
        let mut m = n;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let s = self.psi_inv_rev[h + i];
                let s_shoup = self.psi_inv_rev_shoup[h + i];
                for j in j1..j1 + t {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = add_mod(u, v, q);
                    a[j + t] = mul_shoup(sub_mod(u, v, q), s, s_shoup, q);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }
        for x in a.iter_mut() {
            *x = mul_shoup(*x, self.n_inv, self.n_inv_shoup, q);
        }
    }
}

#[inline]
fn bit_reverse_index(i: usize, log_n: u32) -> usize {
    i.reverse_bits() >> (usize::BITS - log_n)
}

/// Primitive 2N-th root of unity: ψ^N = −1 forces order exactly 2N.
fn find_psi(q: u64, degree: usize) -> u64 {
    let exponent = (q - 1) / (2 * degree as u64);
    let minus_one = neg_mod(1, q);
    (2..q)
        .map(|g| pow_mod(g, exponent, q))
        .find(|&psi| pow_mod(psi, degree as u64, q) == minus_one)
        .expect("a prime congruent to 1 mod 2N has a primitive 2N-th root")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulus::ntt_primes;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn negacyclic_schoolbook(a: &[u64], b: &[u64], q: u64) -> Vec<u64> {
        let n = a.len();
        let mut out = vec![0u64; n];
        for i in 0..n {
            for j in 0..n {
                let prod = mul_mod(a[i], b[j], q);
                let k = i + j;
                if k < n {
                    out[k] = add_mod(out[k], prod, q);
                } else {
                    out[k - n] = sub_mod(out[k - n], prod, q);
                }
            }
        }
        out
    }

    #[test]
    fn test_roundtrip() {
        let q = ntt_primes(&[50], 1024).unwrap()[0];
        let table = NttTable::new(q, 1024);
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let original: Vec<u64> = (0..1024).map(|_| rng.gen_range(0..q)).collect();
        let mut a = original.clone();
        table.forward(&mut a);
        assert_ne!(a, original);
        table.inverse(&mut a);
        assert_eq!(a, original);
    }

    #[test]
    fn test_pointwise_is_negacyclic_product() {
        let q = 97; // 97 ≡ 1 mod 32
        let n = 16;
        let table = NttTable::new(q, n);
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let a: Vec<u64> = (0..n).map(|_| rng.gen_range(0..q)).collect();
        let b: Vec<u64> = (0..n).map(|_| rng.gen_range(0..q)).collect();
        let expected = negacyclic_schoolbook(&a, &b, q);

        let (mut fa, mut fb) = (a.clone(), b.clone());
        table.forward(&mut fa);
        table.forward(&mut fb);
        let mut prod: Vec<u64> = fa.iter().zip(&fb).map(|(&x, &y)| mul_mod(x, y, q)).collect();
        table.inverse(&mut prod);
        assert_eq!(prod, expected);
    }

    #[test]
    fn test_x_pow_n_wraps_to_minus_one() {
        let q = ntt_primes(&[40], 64).unwrap()[0];
        let table = NttTable::new(q, 64);
        let mut x_last = vec![0u64; 64];
        x_last[63] = 1;
        let mut x = vec![0u64; 64];
        x[1] = 1;
        table.forward(&mut x_last);
        table.forward(&mut x);
        let mut prod: Vec<u64> = x_last.iter().zip(&x).map(|(&u, &v)| mul_mod(u, v, q)).collect();
        table.inverse(&mut prod);
        assert_eq!(prod[0], q - 1);
        assert!(prod[1..].iter().all(|&c| c == 0));
    }
}
