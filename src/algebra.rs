//! Homomorphic add / scalar-mult / mult over ciphertexts of one context.

use crate::cipher::Ciphertext;
use crate::context::SchemeContext;
use crate::error::{HeError, Result};
use crate::keys::{galois_element, normalize_step};
use crate::polynomial::RnsPoly;

/// Arithmetic bound to a context; every operand is checked against it.
pub struct CkksAlgebra<'a> {
    ctx: &'a SchemeContext,
}

impl<'a> CkksAlgebra<'a> {
    pub fn new(ctx: &'a SchemeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &'a SchemeContext {
        self.ctx
    }

    /// Slot-wise sum. Levels must match; a lower scale is lifted by the integer ratio.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.combine(a, b, |x, y| x + y)
    }

    /// Slot-wise difference, same rules as [`CkksAlgebra::add`].
    pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.combine(a, b, |x, y| x - y)
    }

    pub fn negate(&self, c: &Ciphertext) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(c)?;
        Ok(Ciphertext {
            c0: -&c.c0,
            c1: -&c.c1,
            ..c.clone()
        })
    }

    /// Multiply every slot by `k`, encoded as the integer `round(k·Δ)`. The level is
    /// unchanged and the scale grows by Δ.
    pub fn scalar_mul(&self, c: &Ciphertext, k: f64) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(c)?;
        if !k.is_finite() {
            return Err(HeError::invalid(format!("non-finite scalar {k}")));
        }
        let delta = self.ctx.params().global_scale;
        let scale = c.scale * delta;
        self.ctx.check_capacity(c.level, scale)?;
        let factor = (k * delta).round();
        if factor.abs() >= 2f64.powi(126) {
            return Err(HeError::exhausted("encoded scalar exceeds the coefficient range"));
        }
        let factor = factor as i128;
        Ok(Ciphertext {
            c0: c.c0.mul_integer(factor),
            c1: c.c1.mul_integer(factor),
            scale,
            ..c.clone()
        })
    }

    /// Tensor product followed by relinearization; consumes one level.
    pub fn mul(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(a)?;
        self.ctx.check_ciphertext(b)?;
        let level = a.level.max(b.level) + 1;
        let scale = a.scale * b.scale;
        self.ctx.check_capacity(level, scale)?;

        let d0 = &a.c0 * &b.c0;
        let d1 = &(&a.c0 * &b.c1) + &(&a.c1 * &b.c0);
        let mut d2 = &a.c1 * &b.c1;
        let ring = self.ctx.ring();
        ring.to_coefficient(&mut d2);
        let (k0, k1) = self.ctx.relin_key().apply(ring, &d2);

        Ok(Ciphertext {
            context_id: a.context_id,
            level,
            scale,
            slots: a.slots.max(b.slots),
            c0: d0 + &k0,
            c1: d1 + &k1,
        })
    }

    /// Raise the level counter to `target`; lowering it is a `LevelMismatch`.
    pub fn align_level(&self, c: &Ciphertext, target: usize) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(c)?;
        if target < c.level {
            return Err(HeError::LevelMismatch {
                left: c.level,
                right: target,
            });
        }
        self.ctx.check_capacity(target, c.scale)?;
        Ok(Ciphertext {
            level: target,
            ..c.clone()
        })
    }

    /// Rotate slots left by `steps` (right for negative steps) using an attached Galois
    /// key. Rotation is cyclic over the slot count rounded up to a power of two.
    pub fn rotate(&self, c: &Ciphertext, steps: i64) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(c)?;
        let degree = self.ctx.params().poly_modulus_degree;
        if normalize_step(steps, degree) == 0 {
            return Ok(c.clone());
        }
        let key = self.ctx.galois_key(steps)?;
        let g = galois_element(steps, degree);
        let ring = self.ctx.ring();

        let permute = |p: &RnsPoly| {
            let mut coeff = p.clone();
            ring.to_coefficient(&mut coeff);
            coeff.automorphism(g)
        };
        let c0 = ring.evaluation(permute(&c.c0));
        let (k0, k1) = key.apply(ring, &permute(&c.c1));
        Ok(Ciphertext {
            c0: c0 + &k0,
            c1: k1,
            ..c.clone()
        })
    }

    fn combine(
        &self,
        a: &Ciphertext,
        b: &Ciphertext,
        op: impl Fn(&RnsPoly, &RnsPoly) -> RnsPoly,
    ) -> Result<Ciphertext> {
        self.ctx.check_ciphertext(a)?;
        self.ctx.check_ciphertext(b)?;
        if a.level != b.level {
            return Err(HeError::LevelMismatch {
                left: a.level,
                right: b.level,
            });
        }
        let (a, b) = match reconcile_scales(a, b)? {
            Reconciled::Left(lifted) => (lifted, b.clone()),
            Reconciled::Right(lifted) => (a.clone(), lifted),
            Reconciled::Same => (a.clone(), b.clone()),
        };
        Ok(Ciphertext {
            c0: op(&a.c0, &b.c0),
            c1: op(&a.c1, &b.c1),
            slots: a.slots.max(b.slots),
            ..a
        })
    }
}

enum Reconciled {
    Same,
    Left(Ciphertext),
    Right(Ciphertext),
}

/// Bring the lower-scale operand up to the higher scale by an integer factor.
fn reconcile_scales(a: &Ciphertext, b: &Ciphertext) -> Result<Reconciled> {
    let ratio = a.scale.max(b.scale) / a.scale.min(b.scale);
    if (ratio - 1.0).abs() < 1e-9 {
        return Ok(Reconciled::Same);
    }
    let factor = ratio.round();
    if !factor.is_finite() || factor >= 2f64.powi(126) {
        return Err(HeError::exhausted("scale ratio exceeds the coefficient range"));
    }
    let lift = |c: &Ciphertext, target: f64| Ciphertext {
        c0: c.c0.mul_integer(factor as i128),
        c1: c.c1.mul_integer(factor as i128),
        scale: target,
        ..c.clone()
    };
    Ok(if a.scale < b.scale {
        Reconciled::Left(lift(a, b.scale))
    } else {
        Reconciled::Right(lift(b, a.scale))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::params::SchemeParameters;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn context(chain: Vec<u32>, seed: u64) -> SchemeContext {
        let params = SchemeParameters::new(1024, chain, 2f64.powi(30));
        SchemeContext::create_with_rng(params, &mut ChaCha20Rng::seed_from_u64(seed)).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "{a} vs {e}");
        }
    }

    #[test]
    fn test_add() {
        let ctx = context(vec![60, 40, 60], 1);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[1.0, 2.0, 3.0]).unwrap();
        let b = ctx.encrypt(&[0.5, -4.0, 10.0]).unwrap();
        let sum = alg.add(&a, &b).unwrap();
        assert_close(&ctx.decrypt(&sum).unwrap(), &[1.5, -2.0, 13.0], 1e-3);
        let diff = alg.sub(&a, &b).unwrap();
        assert_close(&ctx.decrypt(&diff).unwrap(), &[0.5, 6.0, -7.0], 1e-3);
        let neg = alg.negate(&a).unwrap();
        assert_close(&ctx.decrypt(&neg).unwrap(), &[-1.0, -2.0, -3.0], 1e-3);
    }

    #[test]
    fn test_scalar_mul() {
        let ctx = context(vec![60, 40, 60], 2);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[1.0, -2.0, 4.0]).unwrap();
        let scaled = alg.scalar_mul(&a, -0.5).unwrap();
        assert_eq!(scaled.level(), 0);
        assert_eq!(scaled.scale(), 2f64.powi(60));
        assert_close(&ctx.decrypt(&scaled).unwrap(), &[-0.5, 1.0, -2.0], 1e-3);
        assert_eq!(
            alg.scalar_mul(&a, f64::NAN).unwrap_err().kind(),
            ErrorKind::InvalidParameters
        );
    }

    #[test]
    fn test_mul() {
        let ctx = context(vec![60, 40, 60], 3);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[1.5, -2.0, 3.0]).unwrap();
        let b = ctx.encrypt(&[2.0, 4.0, -1.0]).unwrap();
        let prod = alg.mul(&a, &b).unwrap();
        assert_eq!(prod.level(), 1);
        assert_close(&ctx.decrypt(&prod).unwrap(), &[3.0, -8.0, -3.0], 1e-2);

        let square = alg.mul(&prod, &prod).unwrap();
        assert_eq!(square.level(), 2);
        assert_close(&ctx.decrypt(&square).unwrap(), &[9.0, 64.0, 9.0], 1e-1);
        assert_eq!(
            alg.mul(&square, &a).unwrap_err().kind(),
            ErrorKind::NoiseBudgetExhausted
        );
    }

    #[test]
    fn test_add_lifts_lower_scale() {
        let ctx = context(vec![60, 40, 60], 4);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[1.0, 2.0]).unwrap();
        let b = alg.scalar_mul(&ctx.encrypt(&[3.0, 5.0]).unwrap(), 2.0).unwrap();
        let sum = alg.add(&a, &b).unwrap();
        assert_eq!(sum.scale(), b.scale());
        assert_close(&ctx.decrypt(&sum).unwrap(), &[7.0, 12.0], 1e-3);
    }

    #[test]
    fn test_levels() {
        let ctx = context(vec![60, 40, 60], 5);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[2.0]).unwrap();
        let prod = alg.mul(&a, &a).unwrap();
        let err = alg.add(&a, &prod).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LevelMismatch);

        let lifted = alg.align_level(&a, 1).unwrap();
        assert_eq!(lifted.level(), 1);
        let sum = alg.add(&lifted, &prod).unwrap();
        assert_close(&ctx.decrypt(&sum).unwrap(), &[6.0], 1e-2);

        assert_eq!(
            alg.align_level(&prod, 0).unwrap_err().kind(),
            ErrorKind::LevelMismatch
        );
        assert_eq!(
            alg.align_level(&a, 3).unwrap_err().kind(),
            ErrorKind::NoiseBudgetExhausted
        );
    }

    #[test]
    fn test_context_mismatch() {
        let ctx_a = context(vec![60, 40, 60], 6);
        let ctx_b = context(vec![60, 40, 60], 7);
        let alg = CkksAlgebra::new(&ctx_a);
        let a = ctx_a.encrypt(&[1.0]).unwrap();
        let b = ctx_b.encrypt(&[1.0]).unwrap();
        for err in [
            alg.add(&a, &b).unwrap_err(),
            alg.mul(&a, &b).unwrap_err(),
            alg.scalar_mul(&b, 2.0).unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::ContextMismatch);
        }
    }

    #[test]
    fn test_rotate() {
        let params = SchemeParameters::new(1024, vec![60, 40, 60], 2f64.powi(40));
        let mut ctx =
            SchemeContext::create_with_rng(params, &mut ChaCha20Rng::seed_from_u64(8)).unwrap();
        let keys = ctx
            .generate_galois_keys_with_rng(&[1, -1], &mut ChaCha20Rng::seed_from_u64(1))
            .unwrap();
        ctx.attach_galois_keys(keys);
        let alg = CkksAlgebra::new(&ctx);
        let a = ctx.encrypt(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let left = alg.rotate(&a, 1).unwrap();
        assert_close(&ctx.decrypt(&left).unwrap(), &[2.0, 3.0, 4.0, 1.0], 1e-2);
        let right = alg.rotate(&a, -1).unwrap();
        assert_close(&ctx.decrypt(&right).unwrap(), &[4.0, 1.0, 2.0, 3.0], 1e-2);
        assert_eq!(alg.rotate(&a, 2).unwrap_err().kind(), ErrorKind::MissingGaloisKey);
    }
}
