//! CKKS ciphertext container and its wire format.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{HeError, Result};
use crate::polynomial::RnsPoly;

/// Version tag written into every serialized ciphertext.
pub const CIPHERTEXT_FORMAT_VERSION: u16 = 1;

/// Random 128-bit identifier of a scheme context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub [u8; 16]);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// (c₀, c₁) with decryption `c₀ + c₁·s ≈ Δ·m`, evaluation form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub(crate) context_id: ContextId,
    pub(crate) level: usize,
    pub(crate) scale: f64,
    pub(crate) slots: usize,
    pub(crate) c0: RnsPoly,
    pub(crate) c1: RnsPoly,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u16,
    ciphertext: Ciphertext,
}

impl Ciphertext {
    /// Identifier of the context this ciphertext was produced under.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Multiplicative depth consumed so far.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Number of values decryption yields.
    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            version: CIPHERTEXT_FORMAT_VERSION,
            ciphertext: self.clone(),
        };
        Ok(bincode::serialize(&envelope)?)
    }

    /// Parse a serialized ciphertext. Only the envelope is checked here; the owning
    /// context validates the layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(HeError::DeserializationError("empty ciphertext".into()));
        }
        let envelope: Envelope = bincode::deserialize(bytes)?;
        if envelope.version != CIPHERTEXT_FORMAT_VERSION {
            return Err(HeError::DeserializationError(format!(
                "unsupported ciphertext format version {}",
                envelope.version
            )));
        }
        Ok(envelope.ciphertext)
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_bytes()?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HeError::DeserializationError(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}
