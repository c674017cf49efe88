//! Scheme context: parameters, key material, encryption and decryption.
//!
//! The context is the only component that generates keys. It is immutable after
//! creation apart from [`SchemeContext::attach_galois_keys`].

use std::fmt;
use std::time::Instant;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cipher::{Ciphertext, ContextId};
use crate::encoding::Encoder;
use crate::error::{HeError, Result};
use crate::keys::{normalize_step, GaloisKeys, KeySwitchingKey, PublicKey, SecretKey};
use crate::modulus::ntt_primes;
use crate::params::{SchemeParameters, CAPACITY_MARGIN_BITS};
use crate::polynomial::{Representation, RnsPoly, RnsRing};
use crate::sampling::{gaussian, secure_rng, small_poly, ternary};

/// Version tag written into every exported context.
pub const CONTEXT_FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct ContextEnvelope {
    version: u16,
    id: ContextId,
    params: SchemeParameters,
    primes: Vec<u64>,
    public_key: PublicKey,
    relin_key: KeySwitchingKey,
    galois_keys: GaloisKeys,
    secret_key: Option<Vec<i64>>,
}

/// CKKS scheme context bound to one key set.
#[derive(Clone)]
pub struct SchemeContext {
    id: ContextId,
    params: SchemeParameters,
    ring: RnsRing,
    encoder: Encoder,
    public_key: PublicKey,
    relin_key: KeySwitchingKey,
    galois_keys: GaloisKeys,
    secret_key: Option<SecretKey>,
}

/// Create a fresh context with new keys.
pub fn create_context(degree: usize, modulus_chain: &[u32], scale: f64) -> Result<SchemeContext> {
    SchemeContext::create(SchemeParameters::new(degree, modulus_chain.to_vec(), scale))
}

/// Serialize `context`; the secret key is only included when asked for.
pub fn export_context(context: &SchemeContext, include_secret_key: bool) -> Result<Vec<u8>> {
    context.export(include_secret_key)
}

/// Rebuild a context from [`export_context`] output.
pub fn import_context(serialized: &[u8]) -> Result<SchemeContext> {
    SchemeContext::import(serialized)
}

impl SchemeContext {
    pub fn create(params: SchemeParameters) -> Result<Self> {
        Self::create_with_rng(params, &mut secure_rng())
    }

    /// Create with an explicit generator; reproducible keys for tests.
    pub fn create_with_rng<R: RngCore + CryptoRng>(params: SchemeParameters, rng: &mut R) -> Result<Self> {
        params.validate()?;
        let start = Instant::now();
        let primes = ntt_primes(&params.coeff_mod_bit_sizes, params.poly_modulus_degree)?;
        let ring = RnsRing::new(params.poly_modulus_degree, &primes);

        let secret_key = SecretKey::generate(&ring, rng);
        let public_key = PublicKey::generate(&ring, &secret_key, rng);
        let relin_key = KeySwitchingKey::relinearization(&ring, &secret_key, rng);
        let mut id = [0u8; 16];
        rng.fill_bytes(&mut id);

        let ctx = Self {
            id: ContextId(id),
            encoder: Encoder::new(params.poly_modulus_degree),
            params,
            ring,
            public_key,
            relin_key,
            galois_keys: GaloisKeys::new(),
            secret_key: Some(secret_key),
        };
        debug!(
            context_id = %ctx.id,
            degree = ctx.params.poly_modulus_degree,
            limbs = ctx.ring.moduli().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generated scheme context"
        );
        Ok(ctx)
    }

    /// Serialize the context; without the secret key a peer can evaluate but not decrypt.
    pub fn export(&self, include_secret_key: bool) -> Result<Vec<u8>> {
        let envelope = ContextEnvelope {
            version: CONTEXT_FORMAT_VERSION,
            id: self.id,
            params: self.params.clone(),
            primes: self.ring.moduli().to_vec(),
            public_key: self.public_key.clone(),
            relin_key: self.relin_key.clone(),
            galois_keys: self.galois_keys.clone(),
            secret_key: if include_secret_key {
                self.secret_key.as_ref().map(|sk| sk.coeffs().to_vec())
            } else {
                None
            },
        };
        Ok(bincode::serialize(&envelope)?)
    }

    /// Parse and validate an exported context.
    pub fn import(serialized: &[u8]) -> Result<Self> {
        let envelope: ContextEnvelope = bincode::deserialize(serialized)?;
        let malformed = |msg: &str| HeError::DeserializationError(msg.to_string());

        if envelope.version != CONTEXT_FORMAT_VERSION {
            return Err(malformed("unsupported context format version"));
        }
        envelope
            .params
            .validate()
            .map_err(|e| HeError::DeserializationError(e.to_string()))?;
        let degree = envelope.params.poly_modulus_degree;
        let primes = ntt_primes(&envelope.params.coeff_mod_bit_sizes, degree)
            .map_err(|e| HeError::DeserializationError(e.to_string()))?;
        if primes != envelope.primes {
            return Err(malformed("prime chain does not match the parameters"));
        }

        let ring = RnsRing::new(degree, &primes);
        if !envelope.public_key.is_well_formed(&ring) {
            return Err(malformed("public key layout does not match the ring"));
        }
        if !envelope.relin_key.is_well_formed(&ring) {
            return Err(malformed("relinearization key layout does not match the ring"));
        }
        if envelope
            .galois_keys
            .iter()
            .any(|(&step, key)| step >= degree / 2 || !key.is_well_formed(&ring))
        {
            return Err(malformed("galois key layout does not match the ring"));
        }
        let secret_key = envelope
            .secret_key
            .map(|coeffs| SecretKey::try_from_coeffs(&ring, coeffs))
            .transpose()?;

        debug!(context_id = %envelope.id, degree, "imported scheme context");
        Ok(Self {
            id: envelope.id,
            encoder: Encoder::new(degree),
            params: envelope.params,
            ring,
            public_key: envelope.public_key,
            relin_key: envelope.relin_key,
            galois_keys: envelope.galois_keys,
            secret_key,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn params(&self) -> &SchemeParameters {
        &self.params
    }

    pub fn ring(&self) -> &RnsRing {
        &self.ring
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Highest level a ciphertext may reach.
    pub fn max_level(&self) -> usize {
        self.params.max_level()
    }

    /// Number of values one ciphertext can carry.
    pub fn max_slots(&self) -> usize {
        self.encoder.max_slots()
    }

    pub fn relin_key(&self) -> &KeySwitchingKey {
        &self.relin_key
    }

    /// Galois key for a rotation step.
    pub fn galois_key(&self, step: i64) -> Result<&KeySwitchingKey> {
        self.galois_keys
            .get(&normalize_step(step, self.params.poly_modulus_degree))
            .ok_or(HeError::MissingGaloisKey(step))
    }

    /// Fail with `NoiseBudgetExhausted` if a ciphertext at `level` and `scale` no longer
    /// fits the chain.
    pub fn check_capacity(&self, level: usize, scale: f64) -> Result<()> {
        if level > self.max_level() {
            return Err(HeError::exhausted(format!(
                "level {level} exceeds the chain's maximum level {}",
                self.max_level()
            )));
        }
        let capacity = self.ring.capacity_bits();
        if !scale.is_finite() || scale.log2() + CAPACITY_MARGIN_BITS >= capacity {
            return Err(HeError::exhausted(format!(
                "scale of 2^{:.1} exceeds the {capacity:.0}-bit modulus capacity",
                scale.log2()
            )));
        }
        Ok(())
    }

    /// Generate one Galois key per rotation step; requires the secret key.
    pub fn generate_galois_keys(&self, steps: &[i64]) -> Result<GaloisKeys> {
        self.generate_galois_keys_with_rng(steps, &mut secure_rng())
    }

    pub fn generate_galois_keys_with_rng<R: RngCore + CryptoRng>(
        &self,
        steps: &[i64],
        rng: &mut R,
    ) -> Result<GaloisKeys> {
        let sk = self
            .secret_key
            .as_ref()
            .ok_or_else(|| HeError::invalid("galois key generation needs the secret key"))?;
        let start = Instant::now();
        let degree = self.params.poly_modulus_degree;
        let mut keys = GaloisKeys::new();
        for &step in steps {
            let normalized = normalize_step(step, degree);
            if normalized == 0 || keys.contains_key(&normalized) {
                continue;
            }
            keys.insert(normalized, KeySwitchingKey::galois(&self.ring, sk, step, rng));
        }
        debug!(
            context_id = %self.id,
            keys = keys.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generated galois keys"
        );
        Ok(keys)
    }

    /// Attach Galois keys produced for this context.
    pub fn attach_galois_keys(&mut self, keys: GaloisKeys) {
        self.galois_keys.extend(keys);
    }

    pub fn encrypt(&self, values: &[f64]) -> Result<Ciphertext> {
        self.encrypt_with_rng(values, &mut secure_rng())
    }

    pub fn encrypt_with_rng<R: RngCore + CryptoRng>(&self, values: &[f64], rng: &mut R) -> Result<Ciphertext> {
        let coeffs = self.encoder.encode(values, self.params.global_scale)?;
        self.encrypt_coeffs(&coeffs, values.len(), rng)
    }

    /// Encrypt `value` broadcast over `slots` slots at level 0.
    pub fn encrypt_constant(&self, value: f64, slots: usize) -> Result<Ciphertext> {
        self.encrypt_constant_with_rng(value, slots, &mut secure_rng())
    }

    pub fn encrypt_constant_with_rng<R: RngCore + CryptoRng>(
        &self,
        value: f64,
        slots: usize,
        rng: &mut R,
    ) -> Result<Ciphertext> {
        if slots == 0 || slots > self.max_slots() {
            return Err(HeError::invalid(format!(
                "slot count {slots} outside [1, {}]",
                self.max_slots()
            )));
        }
        if !value.is_finite() {
            return Err(HeError::invalid(format!("non-finite constant {value}")));
        }
        let scaled = (value * self.params.global_scale).round();
        if scaled.abs() >= 2f64.powi(120) {
            return Err(HeError::invalid("constant magnitude exceeds the coefficient range"));
        }
        self.encrypt_coeffs(&[scaled as i128], slots, rng)
    }

    fn encrypt_coeffs<R: RngCore + CryptoRng>(
        &self,
        coeffs: &[i128],
        slots: usize,
        rng: &mut R,
    ) -> Result<Ciphertext> {
        let max_abs = coeffs.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
        if max_abs > 0 && (max_abs as f64).log2() + 2.0 >= self.ring.capacity_bits() {
            return Err(HeError::invalid("input magnitude exceeds the modulus capacity"));
        }
        let degree = self.ring.degree();
        let m = self.ring.evaluation(self.ring.from_signed(coeffs));
        let u = small_poly(&self.ring, &ternary(degree, rng));
        let e0 = small_poly(&self.ring, &gaussian(degree, rng));
        let e1 = small_poly(&self.ring, &gaussian(degree, rng));

        let c0 = &(&self.public_key.b * &u) + &e0 + &m;
        let c1 = &(&self.public_key.a * &u) + &e1;
        Ok(Ciphertext {
            context_id: self.id,
            level: 0,
            scale: self.params.global_scale,
            slots,
            c0,
            c1,
        })
    }

    /// Decrypt and decode; needs the secret key and a ciphertext of this context.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<f64>> {
        if ciphertext.context_id != self.id {
            return Err(HeError::DecryptionError(format!(
                "ciphertext belongs to context {}, not {}",
                ciphertext.context_id, self.id
            )));
        }
        self.check_layout(ciphertext)
            .map_err(|e| HeError::DecryptionError(e.to_string()))?;
        let sk = self
            .secret_key
            .as_ref()
            .ok_or_else(|| HeError::DecryptionError("context holds no secret key".into()))?;

        let mut m = &ciphertext.c0 + &(&ciphertext.c1 * sk.poly());
        self.ring.to_coefficient(&mut m);
        let coeffs = self.ring.reconstruct_scaled(&m, ciphertext.scale);
        Ok(self.encoder.decode(&coeffs, ciphertext.slots))
    }

    /// Parse and decrypt; any parse failure is reported as `DecryptionError`.
    pub fn decrypt_bytes(&self, bytes: &[u8]) -> Result<Vec<f64>> {
        let ciphertext =
            Ciphertext::from_bytes(bytes).map_err(|e| HeError::DecryptionError(e.to_string()))?;
        self.decrypt(&ciphertext)
    }

    /// Parse a ciphertext and check that it belongs to this context.
    pub fn parse_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext> {
        let ciphertext = Ciphertext::from_bytes(bytes)?;
        self.check_ciphertext(&ciphertext)?;
        Ok(ciphertext)
    }

    /// `ContextMismatch` for foreign ciphertexts, `DeserializationError` for bad layouts.
    pub fn check_ciphertext(&self, ciphertext: &Ciphertext) -> Result<()> {
        if ciphertext.context_id != self.id {
            return Err(HeError::ContextMismatch {
                expected: self.id.to_string(),
                found: ciphertext.context_id.to_string(),
            });
        }
        self.check_layout(ciphertext)
    }

    fn check_layout(&self, ciphertext: &Ciphertext) -> Result<()> {
        let well_formed = |p: &RnsPoly| {
            p.representation == Representation::Evaluation
                && p.is_well_formed(self.ring.moduli(), self.ring.degree())
        };
        if !well_formed(&ciphertext.c0) || !well_formed(&ciphertext.c1) {
            return Err(HeError::DeserializationError(
                "ciphertext layout does not match the context".into(),
            ));
        }
        if ciphertext.slots == 0 || ciphertext.slots > self.max_slots() {
            return Err(HeError::DeserializationError(format!(
                "ciphertext slot count {} is invalid",
                ciphertext.slots
            )));
        }
        if ciphertext.level > self.max_level() || !(ciphertext.scale.is_finite() && ciphertext.scale >= 1.0) {
            return Err(HeError::DeserializationError(
                "ciphertext level or scale is out of range".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SchemeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeContext")
            .field("id", &self.id.to_string())
            .field("params", &self.params)
            .field("galois_steps", &self.galois_keys.keys().collect::<Vec<_>>())
            .field("has_secret_key", &self.secret_key.is_some())
            .finish()
    }
}
